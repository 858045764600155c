use std::collections::HashMap;

use chrono::Datelike;
use tracing::debug;

use crate::domain::FileRecord;

/// A later duplicate replaces the kept record only when it has a known kind
/// and the kept one does not. Undated records are dropped.
pub fn uniqueify(records: Vec<FileRecord>) -> Vec<FileRecord> {
    let mut positions: HashMap<(String, u32, i32), usize> = HashMap::new();
    let mut unique: Vec<FileRecord> = Vec::with_capacity(records.len());

    for record in records {
        let Some(timestamp) = record.timestamp else {
            debug!(filename = %record.filename, "dropping record without parseable timestamp");
            continue;
        };
        let identity = (record.filename.clone(), timestamp.month(), timestamp.year());
        match positions.get(&identity) {
            Some(&position) => {
                if record.has_known_kind() && !unique[position].has_known_kind() {
                    unique[position] = record;
                }
            }
            None => {
                positions.insert(identity, unique.len());
                unique.push(record);
            }
        }
    }
    unique
}
