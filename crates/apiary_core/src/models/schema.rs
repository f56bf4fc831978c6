//! Catalog browsing models.
//!
//! The catalog is a lazily expanded tree: databases, their tables, and the
//! columns of each table. Nodes live in an arena keyed by [`CatalogNodeId`].
//! Children are created when their parent's fetch completes and are
//! destroyed when the parent is collapsed or refreshed.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ApiaryError;

/// One column of a described table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    /// Column name.
    pub name: String,
    /// Declared type, e.g. "string" or "decimal(10,2)".
    pub data_type: String,
    /// Column comment, empty when none.
    pub comment: String,
}

/// Identifier of a node within one [`CatalogTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CatalogNodeId(usize);

impl fmt::Display for CatalogNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a catalog node represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogNodeKind {
    /// Invisible root whose children are the databases.
    Root,
    /// A database.
    Database {
        /// Database name.
        name: String,
    },
    /// A table within a database.
    Table {
        /// Owning database.
        database: String,
        /// Table name.
        name: String,
    },
    /// A column of a table. Always a leaf.
    Column(TableColumn),
}

impl CatalogNodeKind {
    /// Display label.
    pub fn label(&self) -> &str {
        match self {
            Self::Root => "",
            Self::Database { name } | Self::Table { name, .. } => name,
            Self::Column(column) => &column.name,
        }
    }

    /// Whether the node can never have children.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Column(_))
    }
}

/// Load state of a node's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// Children have not been fetched.
    #[default]
    Unloaded,
    /// A fetch is outstanding.
    Loading,
    /// Children are populated.
    Loaded,
}

/// A node of the catalog tree.
#[derive(Debug, Clone)]
pub struct CatalogNode {
    id: CatalogNodeId,
    parent: Option<CatalogNodeId>,
    kind: CatalogNodeKind,
    state: LoadState,
    children: Vec<CatalogNodeId>,
    /// Bumped each time a fetch is issued; replies for older values are stale.
    generation: u64,
}

impl CatalogNode {
    /// Node identifier.
    pub fn id(&self) -> CatalogNodeId {
        self.id
    }

    /// Parent node, `None` for the root.
    pub fn parent(&self) -> Option<CatalogNodeId> {
        self.parent
    }

    /// What this node represents.
    pub fn kind(&self) -> &CatalogNodeKind {
        &self.kind
    }

    /// Load state of this node's children.
    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Child node ids, in server order.
    pub fn children(&self) -> &[CatalogNodeId] {
        &self.children
    }
}

/// Catalog query needed to expand a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogQuery {
    /// `SHOW DATABASES`
    Databases,
    /// `SHOW TABLES IN <database>`
    Tables {
        /// Database to list.
        database: String,
    },
    /// `DESCRIBE <database>.<table>`
    Columns {
        /// Owning database.
        database: String,
        /// Table to describe.
        table: String,
    },
}

/// A fetch issued for one node expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRequest {
    /// Node being expanded.
    pub node: CatalogNodeId,
    /// Node generation when the request was issued.
    pub generation: u64,
    /// Query to run.
    pub query: CatalogQuery,
}

/// Successful reply to a [`CatalogQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogPayload {
    /// Database names.
    Databases(Vec<String>),
    /// Table names.
    Tables(Vec<String>),
    /// Table columns.
    Columns(Vec<TableColumn>),
}

/// Terminal event of one catalog fetch.
#[derive(Debug)]
pub struct CatalogResponse {
    /// The request this answers.
    pub request: CatalogRequest,
    /// Payload or the driver's error.
    pub result: Result<CatalogPayload, ApiaryError>,
}

/// How a [`CatalogResponse`] was taken into the tree.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Children were populated; the node is `Loaded`.
    Loaded(Vec<CatalogNodeId>),
    /// The fetch failed; the node is back to `Unloaded`.
    Failed(ApiaryError),
    /// The node was collapsed, refreshed or removed since the request was issued.
    Stale,
}

/// Arena of catalog nodes with a single root.
#[derive(Debug, Clone)]
pub struct CatalogTree {
    nodes: HashMap<CatalogNodeId, CatalogNode>,
    root: CatalogNodeId,
    next_id: usize,
}

impl Default for CatalogTree {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogTree {
    /// Create a tree holding only an unloaded root.
    pub fn new() -> Self {
        let root = CatalogNodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            CatalogNode {
                id: root,
                parent: None,
                kind: CatalogNodeKind::Root,
                state: LoadState::Unloaded,
                children: Vec::new(),
                generation: 0,
            },
        );
        Self { nodes, root, next_id: 1 }
    }

    /// The root node id.
    pub fn root(&self) -> CatalogNodeId {
        self.root
    }

    /// Look up a node.
    pub fn get(&self, id: CatalogNodeId) -> Option<&CatalogNode> {
        self.nodes.get(&id)
    }

    /// Children of a node, in order.
    pub fn children(&self, id: CatalogNodeId) -> Vec<&CatalogNode> {
        self.get(id)
            .map(|node| node.children.iter().filter_map(|child| self.nodes.get(child)).collect())
            .unwrap_or_default()
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree holds only its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Start expanding an `Unloaded` node.
    ///
    /// Moves it to `Loading` and returns the fetch to issue. Returns `None` for
    /// leaves, unknown ids, and nodes already loading or loaded.
    pub fn begin_expand(&mut self, id: CatalogNodeId) -> Option<CatalogRequest> {
        let node = self.nodes.get_mut(&id)?;
        if node.state != LoadState::Unloaded {
            return None;
        }

        let query = match &node.kind {
            CatalogNodeKind::Root => CatalogQuery::Databases,
            CatalogNodeKind::Database { name } => CatalogQuery::Tables { database: name.clone() },
            CatalogNodeKind::Table { database, name } => {
                CatalogQuery::Columns { database: database.clone(), table: name.clone() }
            }
            CatalogNodeKind::Column(_) => return None,
        };

        node.state = LoadState::Loading;
        node.generation += 1;
        Some(CatalogRequest { node: id, generation: node.generation, query })
    }

    /// Take a fetch reply into the tree.
    pub fn apply(&mut self, response: CatalogResponse) -> ApplyOutcome {
        let CatalogResponse { request, result } = response;

        let current = match self.nodes.get(&request.node) {
            Some(node) => node.state == LoadState::Loading && node.generation == request.generation,
            None => false,
        };
        if !current {
            tracing::debug!(node = %request.node, "Dropping stale catalog reply");
            return ApplyOutcome::Stale;
        }

        let payload = match result {
            Ok(payload) => payload,
            Err(error) => {
                self.fail(request.node);
                return ApplyOutcome::Failed(error);
            }
        };

        let kinds: Vec<CatalogNodeKind> = match (payload, &request.query) {
            (CatalogPayload::Databases(names), CatalogQuery::Databases) => {
                names.into_iter().map(|name| CatalogNodeKind::Database { name }).collect()
            }
            (CatalogPayload::Tables(names), CatalogQuery::Tables { database }) => names
                .into_iter()
                .map(|name| CatalogNodeKind::Table { database: database.clone(), name })
                .collect(),
            (CatalogPayload::Columns(columns), CatalogQuery::Columns { .. }) => {
                columns.into_iter().map(CatalogNodeKind::Column).collect()
            }
            _ => {
                self.fail(request.node);
                return ApplyOutcome::Failed(ApiaryError::internal(
                    "Catalog reply does not match its request",
                ));
            }
        };

        let children: Vec<CatalogNodeId> =
            kinds.into_iter().map(|kind| self.insert(request.node, kind)).collect();

        if let Some(node) = self.nodes.get_mut(&request.node) {
            node.children = children.clone();
            node.state = LoadState::Loaded;
        }
        ApplyOutcome::Loaded(children)
    }

    /// Return a `Loading` node to `Unloaded` after a failed fetch.
    pub fn fail(&mut self, id: CatalogNodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if node.state == LoadState::Loading {
                node.state = LoadState::Unloaded;
            }
        }
    }

    /// Destroy a node's children and return it to `Unloaded`.
    ///
    /// Any outstanding fetch for the node becomes stale.
    pub fn collapse(&mut self, id: CatalogNodeId) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        let children = std::mem::take(&mut node.children);
        node.state = LoadState::Unloaded;

        for child in children {
            self.remove_subtree(child);
        }
    }

    /// Discard a node's children and issue its fetch again.
    pub fn refresh(&mut self, id: CatalogNodeId) -> Option<CatalogRequest> {
        self.collapse(id);
        self.begin_expand(id)
    }

    fn insert(&mut self, parent: CatalogNodeId, kind: CatalogNodeKind) -> CatalogNodeId {
        let id = CatalogNodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            CatalogNode {
                id,
                parent: Some(parent),
                kind,
                state: LoadState::Unloaded,
                children: Vec::new(),
                generation: 0,
            },
        );
        id
    }

    fn remove_subtree(&mut self, id: CatalogNodeId) {
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                pending.extend(node.children);
            }
        }
    }
}
