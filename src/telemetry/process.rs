use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use sysinfo::{ProcessesToUpdate, System};

/// Host callback telling the reader whether the simulator is running.
pub trait ProcessProbe: Send {
    fn is_running(&mut self, executable: &str) -> bool;
}

/// Looks the executable up in the OS process table.
pub struct SystemProcessProbe {
    system: System,
}

impl Default for SystemProcessProbe {
    fn default() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl ProcessProbe for SystemProcessProbe {
    fn is_running(&mut self, executable: &str) -> bool {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        self.system
            .processes()
            .values()
            .any(|process| process.name().to_string_lossy().eq_ignore_ascii_case(executable))
    }
}

/// Probe flipped by its owner. Used where there is no process to look for,
/// such as a bridge feeding a file-backed segment.
#[derive(Debug, Clone)]
pub struct ManualProcessProbe {
    running: Arc<AtomicBool>,
}

impl ManualProcessProbe {
    pub fn new(running: bool) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(running)),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

impl ProcessProbe for ManualProcessProbe {
    fn is_running(&mut self, _executable: &str) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
