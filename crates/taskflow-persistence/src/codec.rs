use crate::Result;
use taskflow_core::TaskRecord;

/// Encode a record as the self-describing JSON document stored in a shard file.
pub fn encode_record(record: &TaskRecord) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(record)?)
}

/// Decode and validate a shard file.
///
/// Malformed JSON, an out-of-range priority, an unknown status or a record
/// breaking the lifecycle rules all come back as a reason string; the caller
/// attaches the path.
pub fn decode_record(bytes: &[u8]) -> std::result::Result<TaskRecord, String> {
    let record: TaskRecord = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    record.validate()?;
    Ok(record)
}
