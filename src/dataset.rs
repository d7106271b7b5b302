use crate::EvalsetError;
use crate::model::EvaluationRecord;

/// How a batch of newly built records enters the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    #[default]
    Append,
    Replace,
}

impl std::str::FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "append" => Ok(LoadMode::Append),
            "replace" | "overwrite" => Ok(LoadMode::Replace),
            other => Err(format!("unknown mode: {other} (expected append, replace)")),
        }
    }
}

/// Ordered, in-memory evaluation dataset for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetStore {
    records: Vec<EvaluationRecord>,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<EvaluationRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[EvaluationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&EvaluationRecord> {
        self.records.get(index)
    }

    pub fn append(&mut self, records: Vec<EvaluationRecord>) {
        self.records.extend(records);
    }

    pub fn replace_all(&mut self, records: Vec<EvaluationRecord>) {
        self.records = records;
    }

    /// Replace wins when asked for, or when there is nothing to append to.
    pub fn load(&mut self, records: Vec<EvaluationRecord>, mode: LoadMode) {
        if mode == LoadMode::Replace || self.records.is_empty() {
            self.replace_all(records);
        } else {
            self.append(records);
        }
    }

    pub fn update_at(&mut self, index: usize, record: EvaluationRecord) -> Result<(), EvalsetError> {
        if record.input_query.trim().is_empty() {
            return Err(EvalsetError::Validation("input query must not be empty".into()));
        }
        let len = self.records.len();
        let slot = self
            .records
            .get_mut(index)
            .ok_or_else(|| out_of_range(index, len))?;
        *slot = record;
        Ok(())
    }

    pub fn delete_at(&mut self, index: usize) -> Result<EvaluationRecord, EvalsetError> {
        if index >= self.records.len() {
            return Err(out_of_range(index, self.records.len()));
        }
        Ok(self.records.remove(index))
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }
}

pub(crate) fn out_of_range(index: usize, len: usize) -> EvalsetError {
    EvalsetError::Validation(format!("record {} does not exist (dataset has {len})", index + 1))
}
