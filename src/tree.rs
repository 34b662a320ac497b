use serde::Serialize;

use crate::boxes::BoxHeader;
use crate::catalog::BoxDescriptor;
use crate::issues::ParseIssue;
use crate::payload::ParsedBoxPayload;
use crate::pipeline::ParseEvent;
use crate::walker::ParseEventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Valid,
    /// A traversal guard cut the subtree short.
    Partial,
    /// Header or payload bytes were damaged.
    Corrupted,
}

impl NodeStatus {
    fn from_issues(issues: &[ParseIssue]) -> Self {
        if issues.iter().any(|i| i.code.starts_with("header.") || i.code.starts_with("payload.")) {
            NodeStatus::Corrupted
        } else if issues.iter().any(|i| i.code.starts_with("guard.")) {
            NodeStatus::Partial
        } else {
            NodeStatus::Valid
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxNode {
    pub header: BoxHeader,
    pub metadata: Option<BoxDescriptor>,
    pub payload: Option<ParsedBoxPayload>,
    pub issues: Vec<ParseIssue>,
    pub status: NodeStatus,
    pub children: Vec<BoxNode>,
}

impl BoxNode {
    /// Node ids are box start offsets.
    pub fn id(&self) -> u64 {
        self.header.start
    }

    pub fn label(&self) -> String {
        format!("{}@{}", self.header.display_type(), self.header.start)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseTree {
    pub nodes: Vec<BoxNode>,
    pub issues: Vec<ParseIssue>,
}

impl ParseTree {
    /// Pre-order traversal.
    pub fn iter(&self) -> impl Iterator<Item = &BoxNode> {
        let mut stack: Vec<&BoxNode> = self.nodes.iter().rev().collect();
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Root-to-node chain for `id`, or empty when no node starts there.
    pub fn path(&self, id: u64) -> Vec<&BoxNode> {
        let mut path = Vec::new();
        let mut level = &self.nodes;
        // Children start strictly after their parent's header, so at most one
        // node per level covers `id`.
        while let Some(node) = level.iter().find(|n| n.header.range().contains(&id)) {
            path.push(node);
            if node.id() == id {
                return path;
            }
            level = &node.children;
        }
        Vec::new()
    }

    pub fn find(&self, id: u64) -> Option<&BoxNode> {
        self.path(id).last().copied()
    }

    /// `moov@0 > trak@32 > mdia@48`
    pub fn breadcrumb(&self, id: u64) -> Option<String> {
        let path = self.path(id);
        if path.is_empty() {
            return None;
        }
        Some(path.iter().map(|n| n.label()).collect::<Vec<_>>().join(" > "))
    }
}

/// Folds the flat event stream into a tree with an explicit stack of open nodes.
///
/// Issues are attached to the node named by their first affected id, which
/// may be an ancestor or an already closed sibling of the box whose event
/// carried them. Statuses are settled once the tree is complete.
#[derive(Debug, Default)]
pub struct ParseTreeBuilder {
    open: Vec<BoxNode>,
    roots: Vec<BoxNode>,
}

impl ParseTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consume(&mut self, event: &ParseEvent) {
        match &event.kind {
            ParseEventKind::WillStartBox { header, .. } => {
                self.open.push(BoxNode {
                    header: header.clone(),
                    metadata: event.metadata.clone(),
                    payload: event.payload.clone(),
                    issues: Vec::new(),
                    status: NodeStatus::Valid,
                    children: Vec::new(),
                });
                self.route(&event.issues, header.start);
            }
            ParseEventKind::DidFinishBox { header, .. } => {
                self.route(&event.issues, header.start);
                let Some(node) = self.open.pop() else {
                    tracing::debug!(offset = header.start, "finish event without an open node");
                    return;
                };
                self.attach(node);
            }
        }
    }

    fn route(&mut self, issues: &[ParseIssue], event_node: u64) {
        for issue in issues {
            let target = issue.affected_node_ids.first().copied().unwrap_or(event_node);
            let target = if self.node_mut(target).is_some() { target } else { event_node };
            match self.node_mut(target) {
                Some(node) => node.issues.push(issue.clone()),
                None => tracing::debug!(code = %issue.code, target, "issue has no node in the tree"),
            }
        }
    }

    /// Open nodes are searched innermost first, then their closed children,
    /// then the closed roots.
    fn node_mut(&mut self, id: u64) -> Option<&mut BoxNode> {
        let index = self.open.iter().rposition(|n| n.id() == id || locate(&n.children, id).is_some());
        match index {
            Some(i) => {
                let node = &mut self.open[i];
                if node.id() == id {
                    Some(node)
                } else {
                    locate_mut(&mut node.children, id)
                }
            }
            None => locate_mut(&mut self.roots, id),
        }
    }

    fn attach(&mut self, node: BoxNode) {
        match self.open.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.roots.push(node),
        }
    }

    /// Close anything still open and return the tree.
    pub fn finish(mut self, issues: Vec<ParseIssue>) -> ParseTree {
        while let Some(node) = self.open.pop() {
            self.attach(node);
        }
        settle(&mut self.roots);
        ParseTree { nodes: self.roots, issues }
    }
}

fn locate(nodes: &[BoxNode], id: u64) -> Option<&BoxNode> {
    let node = nodes.iter().find(|n| n.header.range().contains(&id))?;
    if node.id() == id {
        Some(node)
    } else {
        locate(&node.children, id)
    }
}

fn locate_mut(nodes: &mut [BoxNode], id: u64) -> Option<&mut BoxNode> {
    let node = nodes.iter_mut().find(|n| n.header.range().contains(&id))?;
    if node.id() == id {
        Some(node)
    } else {
        locate_mut(&mut node.children, id)
    }
}

fn settle(nodes: &mut [BoxNode]) {
    for node in nodes {
        node.status = NodeStatus::from_issues(&node.issues);
        settle(&mut node.children);
    }
}
