//! Hierarchical command namespace built once at startup.

use std::fmt;

use indexmap::IndexMap;
use tracing::warn;
use warden_sdk::{CapabilityDescriptor, CapabilityId, CommandDescriptor};

use crate::error::DispatchError;

#[derive(Debug, Default)]
struct Node {
    leaves: IndexMap<String, CommandDescriptor>,
    groups: IndexMap<String, Node>,
}

impl Node {
    fn collect_usage(&self, prefix: &str, out: &mut Vec<String>) {
        for command in self.leaves.values() {
            out.push(format!("{prefix} {}", command.usage()));
        }
        for group in self.groups.values() {
            group.collect_usage(prefix, out);
        }
    }
}

/// Why a command was left out of (or partially hidden in) the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// The base command already belongs to another capability.
    BaseTaken { claimed_by: CapabilityId },
    /// The capability declares commands but no base command.
    MissingBase,
    /// A leaf with the same path was registered first.
    DuplicateLeaf,
    /// A leaf and a group share a name at the same depth; whichever was
    /// registered first keeps it.
    LeafGroupClash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConflict {
    pub owner: CapabilityId,
    pub path: String,
    pub kind: ConflictKind,
}

impl fmt::Display for CommandConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ConflictKind::BaseTaken { claimed_by } => write!(
                f,
                "{}: base command of `{}` already belongs to {claimed_by}",
                self.owner, self.path
            ),
            ConflictKind::MissingBase => {
                write!(f, "{}: `{}` has no base command", self.owner, self.path)
            }
            ConflictKind::DuplicateLeaf => {
                write!(f, "{}: `{}` is already registered", self.owner, self.path)
            }
            ConflictKind::LeafGroupClash => write!(
                f,
                "{}: `{}` collides with a command or group of the same name",
                self.owner, self.path
            ),
        }
    }
}

/// A resolved command and its positional arguments.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub command: CommandDescriptor,
    pub args: Vec<String>,
}

#[derive(Debug, Default)]
pub struct CommandTree {
    bases: IndexMap<String, (CapabilityId, Node)>,
}

impl CommandTree {
    /// Insert every command of `descriptors`, returning the tree and the
    /// conflicts encountered. Earlier descriptors win.
    pub fn build<'a>(
        descriptors: impl IntoIterator<Item = &'a CapabilityDescriptor>,
    ) -> (Self, Vec<CommandConflict>) {
        let mut tree = Self::default();
        let mut conflicts = Vec::new();
        for descriptor in descriptors {
            tree.insert_descriptor(descriptor, &mut conflicts);
        }
        for conflict in &conflicts {
            warn!("command conflict: {conflict}");
        }
        (tree, conflicts)
    }

    fn insert_descriptor(
        &mut self,
        descriptor: &CapabilityDescriptor,
        conflicts: &mut Vec<CommandConflict>,
    ) {
        if descriptor.commands().is_empty() {
            return;
        }
        let owner = descriptor.id();
        let Some(base) = descriptor.base_command() else {
            for command in descriptor.commands() {
                conflicts.push(CommandConflict {
                    owner: owner.clone(),
                    path: command.usage(),
                    kind: ConflictKind::MissingBase,
                });
            }
            return;
        };

        let (claimed_by, root) = self
            .bases
            .entry(base.to_string())
            .or_insert_with(|| (owner.clone(), Node::default()));
        if *claimed_by != *owner {
            let claimed_by = claimed_by.clone();
            for command in descriptor.commands() {
                conflicts.push(CommandConflict {
                    owner: owner.clone(),
                    path: format!("{base} {}", command.usage()),
                    kind: ConflictKind::BaseTaken {
                        claimed_by: claimed_by.clone(),
                    },
                });
            }
            return;
        }

        for command in descriptor.commands() {
            insert_command(root, base, command, conflicts);
        }
    }

    /// Walk `tokens` down the tree. At every level a leaf beats a group of
    /// the same name; leftover tokens become the arguments.
    pub fn resolve(&self, tokens: &[String]) -> Result<Resolution, DispatchError> {
        let (first, rest) = tokens.split_first().ok_or(DispatchError::CommandNotFound)?;
        let mut node = &self
            .bases
            .get(first.as_str())
            .ok_or(DispatchError::CommandNotFound)?
            .1;

        for (index, token) in rest.iter().enumerate() {
            if let Some(command) = node.leaves.get(token.as_str()) {
                return Ok(Resolution {
                    command: command.clone(),
                    args: rest[index + 1..].to_vec(),
                });
            }
            node = node
                .groups
                .get(token.as_str())
                .ok_or(DispatchError::CommandNotFound)?;
        }
        Err(DispatchError::CommandNotFound)
    }

    /// Registered base commands in registration order.
    pub fn bases(&self) -> Vec<&str> {
        self.bases.keys().map(String::as_str).collect()
    }

    pub fn owner_of(&self, base: &str) -> Option<&CapabilityId> {
        self.bases.get(base).map(|(owner, _)| owner)
    }

    /// Full usage line of every reachable command.
    pub fn describe(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (base, (_, node)) in &self.bases {
            node.collect_usage(base, &mut out);
        }
        out
    }
}

fn insert_command(
    root: &mut Node,
    base: &str,
    command: &CommandDescriptor,
    conflicts: &mut Vec<CommandConflict>,
) {
    let conflict = |kind| CommandConflict {
        owner: command.owner().clone(),
        path: format!("{base} {}", command.usage()),
        kind,
    };

    // Nothing is created until the whole path is known to be free.
    let mut existing = Some(&*root);
    for segment in command.group() {
        let Some(node) = existing else { break };
        if node.leaves.contains_key(segment) {
            conflicts.push(conflict(ConflictKind::LeafGroupClash));
            return;
        }
        existing = node.groups.get(segment);
    }
    if let Some(node) = existing {
        if node.leaves.contains_key(command.alias()) {
            conflicts.push(conflict(ConflictKind::DuplicateLeaf));
            return;
        }
        if node.groups.contains_key(command.alias()) {
            conflicts.push(conflict(ConflictKind::LeafGroupClash));
            return;
        }
    }

    let mut node = root;
    for segment in command.group() {
        node = node.groups.entry(segment.clone()).or_default();
    }
    node.leaves
        .insert(command.alias().to_string(), command.clone());
}
