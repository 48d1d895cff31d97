pub mod gigachat;
