use log::warn;
use serde_jsonlines::JsonLinesReader;
use std::io::BufRead;
use std::path::Path;
use std::sync::mpsc::Sender;

use crate::errors::RelayError;

use super::TouchEvent;

/// Load a whole touch log written as JSON Lines
pub fn load_touches_jsonl(source_file: &Path) -> Result<Vec<TouchEvent>, RelayError> {
    if !source_file.exists() {
        return Err(RelayError::InvalidTouchLog {
            path: format!("{:?}", source_file),
        });
    }

    serde_jsonlines::json_lines(source_file)
        .map_err(|e| RelayError::TouchLoaderError { source: e })?
        .collect::<Result<Vec<TouchEvent>, std::io::Error>>()
        .map_err(|e| RelayError::TouchLoaderError { source: e })
}

/// Stream touches from a line-oriented source into `touch_sender`.
///
/// Malformed lines are logged and skipped. Returns the number of touches forwarded once the
/// source is exhausted or the receiving side hangs up.
pub fn read_touches(
    source: impl BufRead,
    touch_sender: Sender<TouchEvent>,
) -> Result<usize, RelayError> {
    let mut forwarded = 0;
    for line in JsonLinesReader::new(source).read_all::<TouchEvent>() {
        match line {
            Ok(event) => {
                if touch_sender.send(event).is_err() {
                    break;
                }
                forwarded += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!("Skipping malformed touch line: {}", e);
            }
            Err(e) => return Err(RelayError::TouchLoaderError { source: e }),
        }
    }
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_read_touches_skips_bad_lines() {
        let input = "{\"checkpoint_id\":\"A\",\"timestamp_ms\":10}\nnot json\n{\"checkpoint_id\":\"B\",\"timestamp_ms\":20}\n";
        let (tx, rx) = mpsc::channel();
        let forwarded = read_touches(input.as_bytes(), tx).unwrap();
        assert_eq!(forwarded, 2);

        let events: Vec<TouchEvent> = rx.iter().collect();
        assert_eq!(events[0], TouchEvent::new("A", 10));
        assert_eq!(events[1], TouchEvent::new("B", 20));
    }

    #[test]
    fn test_missing_touch_log() {
        assert!(matches!(
            load_touches_jsonl(Path::new("/definitely/not/here.jsonl")),
            Err(RelayError::InvalidTouchLog { .. })
        ));
    }
}
