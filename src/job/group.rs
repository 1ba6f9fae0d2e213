use super::command::Command;

/// Ordered commands sharing one scheduling policy
///
/// `serial` groups run their commands one at a time in listed order.
/// Non-serial groups declare their commands independent, so the job may run
/// them concurrently.
pub struct TaskGroup {
    commands: Vec<Box<dyn Command>>,
    serial: bool,
}

impl TaskGroup {
    pub fn new(commands: Vec<Box<dyn Command>>, serial: bool) -> Self {
        Self { commands, serial }
    }

    pub fn single(command: Box<dyn Command>) -> Self {
        Self::new(vec![command], true)
    }

    pub fn commands(&self) -> &[Box<dyn Command>] {
        &self.commands
    }

    pub fn is_serial(&self) -> bool {
        self.serial
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Whether the group may be fanned out to more than one worker
    pub(crate) fn runs_in_parallel(&self, max_workers: usize) -> bool {
        !self.serial && self.commands.len() > 1 && max_workers > 1
    }
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.commands.iter().map(|c| c.name()).collect();
        f.debug_struct("TaskGroup")
            .field("commands", &names)
            .field("serial", &self.serial)
            .finish()
    }
}
