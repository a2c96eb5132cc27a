//! The extraction stage: schema-sufficiency check, then record extraction

mod extractor;
mod json;
mod records;
mod schema_check;

use tokio_util::sync::CancellationToken;

pub use extractor::{ExtractionOutcome, GraphExtractor};
pub use json::{extract_json_block, strip_fences};
pub use records::{
    DroppedRecord, ExtractionRecord, ParsedRecords, REFER_NONE, RecordFormat, parse_record,
    parse_records, parse_refer,
};
pub use schema_check::{SUFFICIENT, SchemaAnswer, SchemaCheckOutcome, SchemaUpdater, apply_additions};

/// Identity and cancellation flag of the task a stage runs for
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub task_id: &'a str,
    pub cancel: &'a CancellationToken,
}

impl<'a> StageContext<'a> {
    pub fn new(task_id: &'a str, cancel: &'a CancellationToken) -> Self {
        Self { task_id, cancel }
    }
}
