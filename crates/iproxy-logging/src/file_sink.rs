use std::path::PathBuf;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use iproxy_common::beijing_date_string;

enum Command {
    Line(String),
    Flush(oneshot::Sender<()>),
}

/// Single-writer daily log file. Lines are enqueued from any task and
/// drained by one consumer; rotation happens when the Beijing date string
/// changes between writes.
pub(crate) struct FileSink {
    tx: mpsc::UnboundedSender<Command>,
}

impl FileSink {
    pub(crate) fn spawn(dir: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(dir, rx));
        Self { tx }
    }

    pub(crate) fn enqueue(&self, line: String) {
        let _ = self.tx.send(Command::Line(line));
    }

    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn writer_loop(dir: PathBuf, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut current_date = String::new();
    let mut file: Option<tokio::fs::File> = None;

    while let Some(command) = rx.recv().await {
        match command {
            Command::Line(line) => {
                let today = beijing_date_string();
                if today != current_date {
                    // Rotation: drop the old handle, open the new day's file.
                    if let Some(mut old) = file.take() {
                        let _ = old.flush().await;
                    }
                    if fs::create_dir_all(&dir).await.is_err() {
                        continue;
                    }
                    let path = dir.join(format!("{today}.log"));
                    match OpenOptions::new().create(true).append(true).open(&path).await {
                        Ok(handle) => {
                            current_date = today;
                            file = Some(handle);
                        }
                        Err(err) => {
                            eprintln!("log file open failed: {err}");
                            continue;
                        }
                    }
                }
                if let Some(handle) = file.as_mut() {
                    let _ = handle.write_all(line.as_bytes()).await;
                    let _ = handle.write_all(b"\n").await;
                }
            }
            Command::Flush(done) => {
                if let Some(handle) = file.as_mut() {
                    let _ = handle.flush().await;
                }
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lines_reach_the_daily_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::spawn(dir.path().to_path_buf());
        sink.enqueue("[t] [INFO] [Test] hello".to_string());
        sink.flush().await;

        let path = dir.path().join(format!("{}.log", beijing_date_string()));
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("hello"));
    }
}
