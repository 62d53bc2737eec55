//! Evaluation journal.
//!
//! Layout: `<root>/<model>/<key>.json`, one pretty-printed [`EvalRecord`]
//! per evaluation key. A later evaluation with the same key overwrites the
//! earlier record.

use crate::types::EvalRecord;
use crate::{ResultsError, ResultsResult};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct EvalStore {
    root_dir: PathBuf,
}

impl EvalStore {
    pub fn new(root_dir: PathBuf) -> ResultsResult<Self> {
        if !root_dir.exists() {
            fs::create_dir_all(&root_dir)?;
        }
        Ok(Self { root_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    fn model_dir(&self, model: &str) -> ResultsResult<PathBuf> {
        Ok(self.root_dir.join(safe_component(model)?))
    }

    fn record_path(&self, model: &str, key: &str) -> ResultsResult<PathBuf> {
        Ok(self.model_dir(model)?.join(format!("{}.json", safe_component(key)?)))
    }

    pub fn has_record(&self, model: &str, key: &str) -> bool {
        self.record_path(model, key).is_ok_and(|p| p.exists())
    }

    /// Write `record`, replacing any earlier one with the same key.
    pub fn save(&self, record: &EvalRecord) -> ResultsResult<()> {
        let dir = self.model_dir(&record.model)?;
        fs::create_dir_all(&dir)?;

        let path = self.record_path(&record.model, &record.key)?;
        // Written aside and renamed so readers never see a torn record.
        let tmp = dir.join(format!(".{}.{}.tmp", record.key, record.eval_id));
        fs::write(&tmp, serde_json::to_string_pretty(record)?)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn load(&self, model: &str, key: &str) -> ResultsResult<EvalRecord> {
        let path = self.record_path(model, key)?;
        if !path.exists() {
            return Err(ResultsError::RecordNotFound {
                model: model.to_string(),
                key: key.to_string(),
            });
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// A record that may be returned instead of running the solver.
    pub fn find_reusable(&self, model: &str, key: &str) -> Option<EvalRecord> {
        match self.load(model, key) {
            Ok(record) if record.is_reusable() => Some(record),
            Ok(_) | Err(ResultsError::RecordNotFound { .. }) => None,
            Err(e) => {
                tracing::warn!(model, key, error = %e, "unreadable journal record ignored");
                None
            }
        }
    }

    /// Every record of `model`, oldest first. Unreadable files are skipped.
    pub fn list(&self, model: &str) -> ResultsResult<Vec<EvalRecord>> {
        let dir = self.model_dir(model)?;
        let mut records = Vec::new();
        if !dir.exists() {
            return Ok(records);
        }

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(ResultsError::from)
                .and_then(|s| serde_json::from_str::<EvalRecord>(&s).map_err(ResultsError::from))
            {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping journal file"),
            }
        }

        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(records)
    }

    pub fn delete(&self, model: &str, key: &str) -> ResultsResult<()> {
        let path = self.record_path(model, key)?;
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

fn safe_component(part: &str) -> ResultsResult<&str> {
    let ok = !part.is_empty()
        && !part.starts_with('.')
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(part)
    } else {
        Err(ResultsError::InvalidPath(part.to_string()))
    }
}
