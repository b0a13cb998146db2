//! Test-only fixture: an on-disk store seeded with one workspace and task.

use serde_json::Value;
use tempfile::TempDir;

use crate::broadcast::{Broadcaster, Notification, Subscription};
use crate::core::payload::Payload;
use crate::io::store::{NewTask, NewWorkspace, Store, Task, Workspace};
use crate::orchestrator::{DispatchSettings, Orchestrator};

/// Orchestrator over a fresh SQLite file, with a subscriber attached before
/// any operation runs.
pub struct TestBoard {
    pub orchestrator: Orchestrator,
    pub workspace: Workspace,
    pub task: Task,
    pub events: Subscription,
    _dir: TempDir,
}

impl TestBoard {
    pub fn new() -> Self {
        Self::with_settings(DispatchSettings::default())
    }

    pub fn with_settings(settings: DispatchSettings) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("taskflow.db")).expect("open store");
        let broadcaster = Broadcaster::new(256);
        let events = broadcaster.subscribe();
        let orchestrator = Orchestrator::new(store, broadcaster, settings);

        let workspace = orchestrator
            .create_workspace(&NewWorkspace {
                name: "app".to_string(),
                repo_path: "/repos/app".to_string(),
                default_branch: Some("main".to_string()),
            })
            .expect("workspace");
        let task = orchestrator
            .create_task(&NewTask {
                workspace_id: workspace.id.clone(),
                title: "Add login".to_string(),
                description: Some("email + password".to_string()),
            })
            .expect("task");

        Self {
            orchestrator,
            workspace,
            task,
            events,
            _dir: dir,
        }
    }

    pub fn store(&self) -> &Store {
        self.orchestrator.store()
    }

    /// Current state of the seeded task.
    pub fn reload_task(&self) -> Task {
        self.store()
            .get_task(&self.task.id)
            .expect("query task")
            .expect("task exists")
    }

    /// Notifications published since the last call, in order.
    pub fn drain_events(&mut self) -> Vec<Notification> {
        self.events.drain()
    }

    /// Advance the seeded task to `round` fix rounds through continue-fix.
    pub fn force_fix_round(&self, round: u32) {
        for _ in self.reload_task().fix_round..round {
            self.orchestrator
                .continue_fix(&self.task.id)
                .expect("continue fix");
        }
    }
}

impl Default for TestBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a payload from a JSON object literal.
pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("payload must be a JSON object, got {other}"),
    }
}
