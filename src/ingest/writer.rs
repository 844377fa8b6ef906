use log::warn;
use serde_jsonlines::JsonLinesWriter;
use std::{fs::File, io::BufWriter, path::Path, sync::mpsc::Receiver};

use crate::errors::RelayError;

use super::OutcomeRecord;

/// Append every outcome received to a JSON Lines file until the senders hang up.
///
/// Each record is flushed as soon as it is written so the file is complete up to the last
/// outcome even if the process exits without closing the channel.
pub fn write_outcomes(
    file: &Path,
    outcome_receiver: Receiver<OutcomeRecord>,
) -> Result<usize, RelayError> {
    let outcome_file = File::create(file).map_err(|e| RelayError::WriterError { source: e })?;
    let mut outcome_writer = JsonLinesWriter::new(BufWriter::new(outcome_file));
    let mut written = 0;
    for record in &outcome_receiver {
        match outcome_writer
            .write(&record)
            .and_then(|()| outcome_writer.flush())
        {
            Ok(()) => written += 1,
            Err(e) => warn!("Error while writing outcome to output file: {}", e),
        }
    }
    outcome_writer
        .flush()
        .map_err(|e| RelayError::WriterError { source: e })?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::mpsc, thread, time::Duration};

    fn dropped(timestamp_ms: u128) -> OutcomeRecord {
        OutcomeRecord::Dropped {
            checkpoint_id: "A".to_string(),
            timestamp_ms,
            reason: "no candidate".to_string(),
        }
    }

    fn lines_on_disk(path: &Path) -> usize {
        std::fs::read_to_string(path)
            .map(|content| content.lines().count())
            .unwrap_or(0)
    }

    #[test]
    fn test_outcomes_reach_disk_while_senders_are_alive() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("outcomes.jsonl");
        let (tx, rx) = mpsc::channel();
        let writer_path = path.clone();
        thread::spawn(move || write_outcomes(&writer_path, rx));

        for ts in 0..20 {
            tx.send(dropped(ts)).unwrap();
        }

        let mut lines = 0;
        for _ in 0..200 {
            lines = lines_on_disk(&path);
            if lines == 20 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(lines, 20);
        drop(tx);
    }

    #[test]
    fn test_writer_returns_count_when_senders_hang_up() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("outcomes.jsonl");
        let (tx, rx) = mpsc::channel();
        tx.send(dropped(1)).unwrap();
        tx.send(dropped(2)).unwrap();
        drop(tx);

        assert_eq!(write_outcomes(&path, rx).unwrap(), 2);
        assert_eq!(lines_on_disk(&path), 2);
    }
}
