use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPurpose {
    CaptchaKick,
    Reminder(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub chat_id: i64,
    pub user_id: i64,
    pub purpose: TaskPurpose,
}

impl TaskKey {
    pub fn captcha_kick(chat_id: i64, user_id: i64) -> Self {
        TaskKey {
            chat_id,
            user_id,
            purpose: TaskPurpose::CaptchaKick,
        }
    }

    pub fn reminder(chat_id: i64, user_id: i64, reminder_id: i64) -> Self {
        TaskKey {
            chat_id,
            user_id,
            purpose: TaskPurpose::Reminder(reminder_id),
        }
    }
}

struct ScheduledTask {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Deferred actions that can be cancelled before they fire. Scheduling a key
/// that is already pending aborts the earlier task.
#[derive(Clone, Default)]
pub struct TaskScheduler {
    tasks: Arc<Mutex<HashMap<TaskKey, ScheduledTask>>>,
    generation: Arc<AtomicU64>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&self, key: TaskKey, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);

        // Hold the lock across spawn so the finished task can't clear the entry before it exists.
        let mut guard = self.tasks.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
            let mut tasks = tasks.lock();
            if tasks
                .get(&key)
                .is_some_and(|entry| entry.generation == generation)
            {
                tasks.remove(&key);
            }
        });

        if let Some(previous) = guard.insert(key, ScheduledTask { generation, handle }) {
            debug!("Superseding scheduled task {:?}", key);
            previous.handle.abort();
        }
    }

    pub fn cancel(&self, key: &TaskKey) -> bool {
        match self.tasks.lock().remove(key) {
            Some(entry) => {
                entry.handle.abort();
                debug!("Cancelled scheduled task {:?}", key);
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: &TaskKey) -> bool {
        self.tasks.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn task_runs_after_delay_and_clears_entry() {
        let scheduler = TaskScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let key = TaskKey::captcha_kick(-1, 2);
        let counter = Arc::clone(&hits);
        scheduler.schedule(key, Duration::from_millis(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.is_scheduled(&key));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled(&key));
    }

    #[tokio::test]
    async fn cancelled_task_never_fires() {
        let scheduler = TaskScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let key = TaskKey::captcha_kick(-1, 2);
        let counter = Arc::clone(&hits);
        scheduler.schedule(key, Duration::from_millis(30), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.cancel(&key));
        assert!(!scheduler.cancel(&key));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn rescheduling_supersedes_previous_task() {
        let scheduler = TaskScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let key = TaskKey::reminder(1, 1, 5);
        for _ in 0..3 {
            let counter = Arc::clone(&hits);
            scheduler.schedule(key, Duration::from_millis(20), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(scheduler.len(), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn keys_differ_by_purpose() {
        let scheduler = TaskScheduler::new();
        scheduler.schedule(TaskKey::captcha_kick(1, 1), Duration::from_secs(60), async {});
        scheduler.schedule(TaskKey::reminder(1, 1, 1), Duration::from_secs(60), async {});
        assert_eq!(scheduler.len(), 2);
        assert!(scheduler.cancel(&TaskKey::captcha_kick(1, 1)));
        assert_eq!(scheduler.len(), 1);
    }
}
