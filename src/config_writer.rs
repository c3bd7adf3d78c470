/*
    Copyright 2024 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! Sink for named sections of the generated load-balancer configuration.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;

/// Failure reported by a [ConfigWriter], immediately or through a [SendHandle].
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum WriterError {
    /// The section could not be written.
    #[error("configuration write failed: {0}")]
    Failed(String),
    /// The writer went away without completing the write.
    #[error("configuration writer disconnected")]
    Disconnected,
}

/// Outcome of waiting on a [SendHandle].
#[derive(Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The section was accepted by the sink.
    Done,
    /// The sink reported a failure after accepting the section.
    Failed(WriterError),
    /// The sink did not report completion within the allotted time.
    TimedOut,
}

/**
  Completion handle for a section write that was accepted by the writer.

  Writers that complete synchronously hand back an already resolved handle.
  Writers that complete in the background resolve it later, or never.
*/
pub struct SendHandle {
    receiver: mpsc::Receiver<Result<(), WriterError>>,
}

impl SendHandle {
    /// Return a handle that is already resolved as successful.
    pub fn completed() -> Self {
        let (sender, receiver) = mpsc::channel();
        sender.send(Ok(())).ok();
        Self { receiver }
    }

    /// Return a handle that is already resolved as failed.
    pub fn failed(error: WriterError) -> Self {
        let (sender, receiver) = mpsc::channel();
        sender.send(Err(error)).ok();
        Self { receiver }
    }

    /// Return an unresolved handle and the sender that resolves it.
    pub fn pending() -> (mpsc::Sender<Result<(), WriterError>>, Self) {
        let (sender, receiver) = mpsc::channel();
        (sender, Self { receiver })
    }

    /// Wait for the write to complete, up to `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> SendOutcome {
        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(())) => SendOutcome::Done,
            Ok(Err(e)) => SendOutcome::Failed(e),
            Err(mpsc::RecvTimeoutError::Timeout) => SendOutcome::TimedOut,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                SendOutcome::Failed(WriterError::Disconnected)
            }
        }
    }
}

/**
  Collaborator that accepts named sections of JSON configuration.

  A failed send is not retried by the caller. The next configuration change
  produces a fresh attempt with the then-current document.
*/
pub trait ConfigWriter: Send + Sync {
    /// Hand a named section of configuration to the sink.
    fn send_section(&self, name: &str, payload: Value) -> Result<SendHandle, WriterError>;
}

/**
  [ConfigWriter] that renders all received sections into a single JSON
  document on disk, replaced atomically on every send.

  The document is the union of the top level keys of every section payload,
  which for the single `services` section produced by this controller means
  the file content equals that payload.
*/
pub struct FileConfigWriter {
    path: PathBuf,
    sections: Mutex<BTreeMap<String, Value>>,
}

impl FileConfigWriter {
    /// Return a writer that maintains the document at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sections: Mutex::new(BTreeMap::new()),
        }
    }

    fn render(&self) -> Value {
        let sections = self.sections.lock().unwrap();
        let mut doc = serde_json::Map::new();
        for payload in sections.values() {
            match payload {
                Value::Object(fields) => {
                    for (k, v) in fields {
                        doc.insert(k.clone(), v.clone());
                    }
                }
                other => {
                    doc.insert("value".to_owned(), other.clone());
                }
            }
        }
        Value::Object(doc)
    }
}

impl ConfigWriter for FileConfigWriter {
    fn send_section(&self, name: &str, payload: Value) -> Result<SendHandle, WriterError> {
        self.sections
            .lock()
            .unwrap()
            .insert(name.to_owned(), payload);
        let rendered = serde_json::to_vec_pretty(&self.render())
            .map_err(|e| WriterError::Failed(e.to_string()))?;
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, rendered).map_err(|e| WriterError::Failed(e.to_string()))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| WriterError::Failed(e.to_string()))?;
        Ok(SendHandle::completed())
    }
}
