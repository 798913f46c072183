use serde::{Deserialize, Serialize};
use crate::core::types::NodeRef;

/// Pending operation against one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Index,
    Reindex,
    CascadeReindex,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub node: NodeRef,
    pub action: Action,
}

/// Ordered, deduplicating queue of pending commands. At most one command per
/// (identity, action) survives, and a Delete supersedes everything queued
/// for its identity.
#[derive(Debug)]
pub struct CommandLog {
    commands: Vec<Command>,
    batch_size: usize,
}

impl CommandLog {
    pub fn new(batch_size: usize) -> Self {
        CommandLog {
            commands: Vec::new(),
            batch_size,
        }
    }

    /// Queue a command, collapsing against what is already pending.
    /// Returns true when the queue has grown past the flush threshold.
    pub fn insert(&mut self, node: NodeRef, action: Action) -> bool {
        let last_for_node = self
            .commands
            .iter()
            .rev()
            .find(|c| c.node == node)
            .map(|c| c.action);
        if last_for_node == Some(action) {
            // No-op duplicate
            return self.commands.len() > self.batch_size;
        }
        match action {
            Action::Delete => {
                // Delete purges anything pending for the identity
                self.commands.retain(|c| c.node != node);
            }
            _ => {
                // Other actions replace only an exact-action match
                self.commands
                    .retain(|c| !(c.node == node && c.action == action));
            }
        }
        self.commands.push(Command { node, action });
        self.commands.len() > self.batch_size
    }

    pub fn drain(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn pending(&self) -> &[Command] {
        &self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StoreRef;

    fn node(id: &str) -> NodeRef {
        NodeRef::new(StoreRef::new("workspace", "main"), id)
    }

    #[test]
    fn duplicate_tail_commands_collapse() {
        let mut log = CommandLog::new(100);
        log.insert(node("a"), Action::Index);
        log.insert(node("a"), Action::Index);
        assert_eq!(log.len(), 1);
        assert_eq!(log.pending()[0].action, Action::Index);
    }

    #[test]
    fn delete_purges_every_pending_command_for_the_identity() {
        let mut log = CommandLog::new(100);
        log.insert(node("a"), Action::Reindex);
        log.insert(node("a"), Action::Index);
        log.insert(node("b"), Action::Index);
        log.insert(node("a"), Action::Delete);

        let actions: Vec<(String, Action)> = log
            .pending()
            .iter()
            .map(|c| (c.node.id.clone(), c.action))
            .collect();
        assert_eq!(
            actions,
            vec![
                ("b".to_string(), Action::Index),
                ("a".to_string(), Action::Delete)
            ]
        );
    }

    #[test]
    fn exact_action_match_is_replaced_others_survive() {
        let mut log = CommandLog::new(100);
        log.insert(node("a"), Action::Reindex);
        log.insert(node("a"), Action::Index);
        // A pending plain Reindex is not removed by a new Index
        assert_eq!(log.len(), 2);

        log.insert(node("a"), Action::Reindex);
        // But a matching Reindex is replaced, moving to the tail
        let actions: Vec<Action> = log.pending().iter().map(|c| c.action).collect();
        assert_eq!(actions, vec![Action::Index, Action::Reindex]);
    }

    #[test]
    fn threshold_reports_once_exceeded() {
        let mut log = CommandLog::new(2);
        assert!(!log.insert(node("a"), Action::Index));
        assert!(!log.insert(node("b"), Action::Index));
        assert!(log.insert(node("c"), Action::Index));
    }
}
