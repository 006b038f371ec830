/// Reads a recorded event file line by line and feeds the decoder.
///
/// Runs on a blocking thread (`spawn_blocking`) and pushes with
/// `blocking_send`, so a slow decoder applies backpressure to the read.
/// Stops quietly when the receiver is gone, which is how the engine ends a
/// replay early after the encounter finishes.
use crate::error::{LedgerError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tokio::sync::mpsc::Sender;

pub fn read_lines(path: &Path, tx: Sender<String>) -> Result<u64> {
    tracing::info!("Reading events from {:?}", path);

    let file   = File::open(path).map_err(|e| LedgerError::io(path, e))?;
    let reader = BufReader::new(file);

    let mut sent = 0;
    for line in reader.lines() {
        let line = line.map_err(|e| LedgerError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        if tx.blocking_send(line).is_err() {
            tracing::debug!("Decoder gone after {} lines, reader exiting", sent);
            break;
        }
        sent += 1;
    }
    Ok(sent)
}
