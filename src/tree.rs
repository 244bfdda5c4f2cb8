use tracing::trace;

use crate::discovery::{ContextNamespaces, DiscoveryError};
use crate::switch::ContextNamespace;

/// What a tree node stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Context(String),
    Namespace(ContextNamespace),
}

/// How a row should be colored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Context whose discovery failed.
    Failed,
    /// The active context, or the active namespace inside it.
    Active,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub label: String,
    pub tone: Tone,
    pub depth: usize,
    /// `Some(expanded)` for contexts that can be expanded.
    pub expandable: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Context(usize),
    Namespace(usize, usize),
}

#[derive(Debug)]
struct Branch {
    name: String,
    error: Option<DiscoveryError>,
    active: bool,
    namespaces: Vec<String>,
    active_namespace: Option<usize>,
    expanded: bool,
}

impl Branch {
    fn label(&self) -> String {
        match self.error.as_ref() {
            Some(err) => format!("{} ({err})", self.name),
            None if self.active => format!("{} (active)", self.name),
            None => self.name.clone(),
        }
    }

    fn tone(&self) -> Tone {
        match (self.error.is_some(), self.active) {
            (true, _) => Tone::Failed,
            (false, true) => Tone::Active,
            (false, false) => Tone::Normal,
        }
    }
}

/// Contexts with their namespaces as a two level tree, with at most one
/// context expanded at a time.
#[derive(Debug)]
pub struct ContextTree {
    branches: Vec<Branch>,
    cursor: Option<Position>,
}

impl ContextTree {
    /// `current_namespace` is the namespace of `current_context`, the active
    /// namespace row gets the initial focus.
    pub fn build(
        results: Vec<ContextNamespaces>,
        current_context: Option<&str>,
        current_namespace: &str,
    ) -> ContextTree {
        let mut cursor = None;
        let mut branches = Vec::with_capacity(results.len());

        for (idx, result) in results.into_iter().enumerate() {
            let active = current_context == Some(result.name.as_str());
            let (namespaces, error) = match result.namespaces {
                Ok(namespaces) => (namespaces, None),
                Err(err) => (Vec::new(), Some(err)),
            };

            let active_namespace = if active {
                namespaces.iter().position(|ns| ns == current_namespace)
            } else {
                None
            };
            if let Some(ns_idx) = active_namespace {
                cursor = Some(Position::Namespace(idx, ns_idx));
            }

            branches.push(Branch {
                name: result.name,
                error,
                active,
                expanded: active && !namespaces.is_empty(),
                namespaces,
                active_namespace,
            });
        }

        let mut tree = ContextTree { branches, cursor };
        if tree.cursor.is_none() {
            tree.cursor = tree.selectable().into_iter().next();
        }
        tree
    }

    /// Visible rows, top to bottom.
    pub fn rows(&self) -> Vec<Row> {
        self.visible()
            .into_iter()
            .map(|pos| self.row(pos))
            .collect()
    }

    /// Index of the focused row in [`ContextTree::rows`].
    pub fn cursor_row(&self) -> Option<usize> {
        let cursor = self.cursor?;
        self.visible().iter().position(|pos| *pos == cursor)
    }

    pub fn move_down(&mut self) {
        self.move_by(1);
    }

    pub fn move_up(&mut self) {
        self.move_by(-1);
    }

    pub fn move_first(&mut self) {
        self.cursor = self.selectable().first().copied();
    }

    pub fn move_last(&mut self) {
        self.cursor = self.selectable().last().copied();
    }

    /// Activate the focused node. A context toggles its expansion, a
    /// namespace is returned as the switch target.
    pub fn select(&mut self) -> Option<ContextNamespace> {
        let cursor = self.cursor?;
        match (cursor, self.node(cursor)) {
            (Position::Context(idx), Node::Context(name)) => {
                trace!("toggle context '{name}'");
                self.toggle(idx);
                None
            }
            (_, Node::Namespace(target)) => Some(target),
            _ => None,
        }
    }

    /// Collapse the branch the cursor is in and focus its context.
    pub fn collapse(&mut self) {
        let idx = match self.cursor {
            Some(Position::Context(idx)) | Some(Position::Namespace(idx, _)) => idx,
            None => return,
        };
        self.branches[idx].expanded = false;
        self.cursor = Some(Position::Context(idx));
    }

    fn toggle(&mut self, idx: usize) {
        if self.branches[idx].error.is_some() {
            return;
        }
        if self.branches[idx].expanded {
            self.branches[idx].expanded = false;
            return;
        }
        for branch in self.branches.iter_mut() {
            branch.expanded = false;
        }
        self.branches[idx].expanded = true;
    }

    fn move_by(&mut self, delta: isize) {
        let selectable = self.selectable();
        if selectable.is_empty() {
            return;
        }
        let current = self
            .cursor
            .and_then(|cursor| selectable.iter().position(|pos| *pos == cursor));
        let next = match current {
            Some(idx) => idx
                .saturating_add_signed(delta)
                .min(selectable.len() - 1),
            None => 0,
        };
        self.cursor = Some(selectable[next]);
    }

    fn visible(&self) -> Vec<Position> {
        let mut positions = Vec::new();
        for (idx, branch) in self.branches.iter().enumerate() {
            positions.push(Position::Context(idx));
            if branch.expanded {
                for ns_idx in 0..branch.namespaces.len() {
                    positions.push(Position::Namespace(idx, ns_idx));
                }
            }
        }
        positions
    }

    fn selectable(&self) -> Vec<Position> {
        self.visible()
            .into_iter()
            .filter(|pos| match pos {
                Position::Context(idx) => self.branches[*idx].error.is_none(),
                Position::Namespace(..) => true,
            })
            .collect()
    }

    fn node(&self, pos: Position) -> Node {
        match pos {
            Position::Context(idx) => Node::Context(self.branches[idx].name.clone()),
            Position::Namespace(idx, ns_idx) => {
                let branch = &self.branches[idx];
                Node::Namespace(ContextNamespace {
                    context: branch.name.clone(),
                    namespace: branch.namespaces[ns_idx].clone(),
                })
            }
        }
    }

    fn row(&self, pos: Position) -> Row {
        match pos {
            Position::Context(idx) => {
                let branch = &self.branches[idx];
                Row {
                    label: branch.label(),
                    tone: branch.tone(),
                    depth: 0,
                    expandable: match branch.error {
                        Some(_) => None,
                        None => Some(branch.expanded),
                    },
                }
            }
            Position::Namespace(idx, ns_idx) => {
                let branch = &self.branches[idx];
                let tone = if branch.active_namespace == Some(ns_idx) {
                    Tone::Active
                } else {
                    Tone::Normal
                };
                Row {
                    label: branch.namespaces[ns_idx].clone(),
                    tone,
                    depth: 1,
                    expandable: None,
                }
            }
        }
    }
}
