//! JSON file endpoint store.
//!
//! The whole registration list is rewritten on every change. Registration is
//! rare compared to selection, so a single mutex around the file is enough.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{EndpointStore, StoreError};
use crate::load_balancer::endpoint::EndpointSpec;

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<EndpointSpec>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a sibling temp file and rename, so readers never see a partial file.
    fn write(&self, specs: &[EndpointSpec]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(specs)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl EndpointStore for JsonFileStore {
    fn put(&self, spec: &EndpointSpec) -> Result<(), StoreError> {
        let id = spec.id.as_deref().ok_or(StoreError::MissingId)?;
        let _guard = self.lock.lock().expect("store mutex poisoned");
        let mut specs = self.read()?;
        match specs.iter_mut().find(|s| s.id.as_deref() == Some(id)) {
            Some(existing) => *existing = spec.clone(),
            None => specs.push(spec.clone()),
        }
        self.write(&specs)
    }

    fn get(&self, id: &str) -> Result<Option<EndpointSpec>, StoreError> {
        let _guard = self.lock.lock().expect("store mutex poisoned");
        Ok(self
            .read()?
            .into_iter()
            .find(|s| s.id.as_deref() == Some(id)))
    }

    fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().expect("store mutex poisoned");
        let mut specs = self.read()?;
        let before = specs.len();
        specs.retain(|s| s.id.as_deref() != Some(id));
        if specs.len() == before {
            return Ok(false);
        }
        self.write(&specs)?;
        Ok(true)
    }

    fn list(&self, service_name: &str) -> Result<Vec<EndpointSpec>, StoreError> {
        let _guard = self.lock.lock().expect("store mutex poisoned");
        Ok(self
            .read()?
            .into_iter()
            .filter(|s| s.service_name == service_name)
            .collect())
    }

    fn list_all(&self) -> Result<Vec<EndpointSpec>, StoreError> {
        let _guard = self.lock.lock().expect("store mutex poisoned");
        self.read()
    }
}
