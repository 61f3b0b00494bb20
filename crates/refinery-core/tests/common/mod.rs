//! Shared fakes for engine integration tests.
#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use refinery_core::{
    git::{MergeError, Merger},
    mail::Mailer,
    mr::MergeRequest,
    queue::{submit, SubmitRequest},
    refinery::{EngineSettings, Refinery},
    tracker::{IssueTracker, MemoryTracker},
    Error, Result,
};

/// Merger whose outcome per branch is scripted; records every attempt.
#[derive(Default)]
pub struct ScriptedMerger {
    failures: Mutex<HashMap<String, String>>,
    attempts: Mutex<Vec<String>>,
    running: Mutex<HashSet<String>>,
    overlaps: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// The next attempt for `branch` fails with a conflict.
    pub fn fail_next(&self, branch: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(branch.to_string(), message.to_string());
    }

    /// Branches attempted, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    /// Targets on which two attempts ran at once.
    pub fn overlaps(&self) -> Vec<String> {
        self.overlaps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Merger for ScriptedMerger {
    async fn merge(&self, mr: &MergeRequest) -> std::result::Result<(), MergeError> {
        self.attempts.lock().unwrap().push(mr.branch.clone());
        if !self.running.lock().unwrap().insert(mr.target.clone()) {
            self.overlaps.lock().unwrap().push(mr.target.clone());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.running.lock().unwrap().remove(&mr.target);
        match self.failures.lock().unwrap().remove(&mr.branch) {
            Some(message) => Err(MergeError::Conflict(message)),
            None => Ok(()),
        }
    }
}

/// Mailer that keeps every message it was asked to send.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String, String)>>,
    pub fail: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<()> {
        self.sent.lock().unwrap().push((
            address.to_string(),
            subject.to_string(),
            body.to_string(),
        ));
        if self.fail {
            Err(Error::Mail("mailbox unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

pub struct Harness {
    pub tracker: Arc<dyn IssueTracker>,
    pub merger: Arc<ScriptedMerger>,
    pub mailer: Arc<RecordingMailer>,
    pub refinery: Refinery,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(
            Arc::new(MemoryTracker::default()),
            ScriptedMerger::new(),
            RecordingMailer::default(),
            EngineSettings::default(),
        )
    }

    pub fn with(
        tracker: Arc<dyn IssueTracker>,
        merger: ScriptedMerger,
        mailer: RecordingMailer,
        settings: EngineSettings,
    ) -> Self {
        let merger = Arc::new(merger);
        let mailer = Arc::new(mailer);
        let refinery = Refinery::new(
            Arc::clone(&tracker),
            Arc::clone(&merger) as Arc<dyn Merger>,
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            settings,
        );
        Self {
            tracker,
            merger,
            mailer,
            refinery,
        }
    }

    /// Submit `branch` to `main` with an explicit priority.
    pub async fn submit(&self, branch: &str, priority: u32) -> Result<MergeRequest> {
        submit(
            self.refinery.repository(),
            SubmitRequest {
                branch: branch.to_string(),
                priority: Some(priority),
                rig: "gastown".to_string(),
                main_branch: "main".to_string(),
                ..SubmitRequest::default()
            },
        )
        .await
    }
}
