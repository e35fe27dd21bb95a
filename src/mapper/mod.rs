//! Dynamic mapper resolver.
//!
//! Resolves `(namespace, statement id, parameters)` to SQL using
//! MyBatis-style XML statements:
//! - `<if>`, `<choose>/<when>/<otherwise>` conditional fragments
//! - `<where>`, `<set>`, `<trim>` prefix/suffix cleanup
//! - `<foreach>` over list-valued parameters
//! - `<bind>`, `<include>`/`<sql>` reuse
//!
//! Caller parameters arrive as text. Each one is screened (when enabled)
//! and then normalized: text that parses as JSON binds the parsed value,
//! everything else stays a raw string.

pub mod expr;
pub mod node;
pub mod xml;

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::params::{ParamValue, ParameterBag};
use crate::template::injection::{self, InjectionDetected};
use node::{Node, RenderContext};

/// Error type for mapper loading and resolution.
#[derive(Debug, Error)]
pub enum MapperError {
    #[error("failed to read mapper directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid mapper {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("statement `{namespace}.{id}` not found")]
    UnknownStatement { namespace: String, id: String },

    #[error("sql fragment `{0}` not found")]
    UnknownFragment(String),

    #[error("include nesting too deep at `{0}`")]
    IncludeDepth(String),

    #[error("parameter `{0}` is not bound")]
    MissingParameter(String),

    #[error("parameter `{0}` is not a list and cannot be iterated")]
    NotIterable(String),

    #[error(transparent)]
    Injection(#[from] InjectionDetected),
}

#[derive(Debug, Default)]
struct Namespace {
    statements: HashMap<String, Vec<Node>>,
    fragments: HashMap<String, Vec<Node>>,
}

/// All loaded mapper statements, grouped by namespace.
#[derive(Debug, Default)]
pub struct MapperRegistry {
    namespaces: HashMap<String, Namespace>,
}

impl MapperRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one XML document and merge its statements.
    ///
    /// A later statement with the same id replaces the earlier one.
    pub fn add_xml(&mut self, origin: &str, xml: &str) -> Result<(), MapperError> {
        let doc = xml::parse_document(xml).map_err(|message| MapperError::Parse {
            origin: origin.to_string(),
            message,
        })?;

        let ns = self.namespaces.entry(doc.namespace.clone()).or_default();
        for (id, nodes) in doc.statements {
            tracing::debug!(namespace = %doc.namespace, id = %id, "Mapper statement loaded");
            ns.statements.insert(id, nodes);
        }
        for (id, nodes) in doc.fragments {
            ns.fragments.insert(id, nodes);
        }
        Ok(())
    }

    /// Load every `*.xml` file in `dir`, in file-name order.
    ///
    /// A directory that does not exist yields an empty registry. Files that
    /// fail to read or parse are logged and skipped.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self, MapperError> {
        let dir = dir.as_ref();
        let mut registry = Self::new();

        if !dir.exists() {
            tracing::info!(path = %dir.display(), "Mapper directory does not exist, no mappers loaded");
            return Ok(registry);
        }

        let io_err = |source| MapperError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "xml"))
            .collect();
        files.sort();

        for path in files {
            let origin = path.display().to_string();
            let loaded = std::fs::read_to_string(&path)
                .map_err(|e| MapperError::Parse {
                    origin: origin.clone(),
                    message: e.to_string(),
                })
                .and_then(|xml| registry.add_xml(&origin, &xml));
            match loaded {
                Ok(()) => tracing::info!(file = %origin, "Mapper file loaded"),
                Err(e) => tracing::warn!(error = %e, "Skipping mapper file"),
            }
        }

        Ok(registry)
    }

    /// Whether `namespace.id` names a known statement.
    pub fn contains(&self, namespace: &str, id: &str) -> bool {
        self.namespaces
            .get(namespace)
            .is_some_and(|ns| ns.statements.contains_key(id))
    }

    pub fn statement_count(&self) -> usize {
        self.namespaces.values().map(|ns| ns.statements.len()).sum()
    }

    /// Look up an `<sql>` fragment by `id` in `namespace`, or by `other.id`.
    pub(crate) fn fragment(&self, namespace: &str, refid: &str) -> Option<&[Node]> {
        let local = self
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.fragments.get(refid));
        let qualified = || {
            let (ns, id) = refid.rsplit_once('.')?;
            self.namespaces.get(ns)?.fragments.get(id)
        };
        local.or_else(qualified).map(Vec::as_slice)
    }

    /// Render `namespace.id` with caller parameters.
    pub fn resolve(
        &self,
        namespace: &str,
        id: &str,
        bag: &ParameterBag,
        screen_injection: bool,
    ) -> Result<String, MapperError> {
        let params = normalize(bag, screen_injection)?;

        let nodes = self
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.statements.get(id))
            .ok_or_else(|| MapperError::UnknownStatement {
                namespace: namespace.to_string(),
                id: id.to_string(),
            })?;

        let values: BTreeMap<String, Value> = params
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();

        tracing::info!(namespace, id, params = ?params, "Resolving mapper statement");

        RenderContext::new(self, namespace, &values).render(nodes)
    }
}

/// Screen and normalize caller parameters.
///
/// Nulls and empty strings are treated as absent.
pub fn normalize(
    bag: &ParameterBag,
    screen_injection: bool,
) -> Result<BTreeMap<String, ParamValue>, InjectionDetected> {
    let mut params = BTreeMap::new();
    for (name, raw) in bag.iter() {
        let Some(raw) = raw.filter(|v| !v.is_empty()) else {
            continue;
        };
        if screen_injection {
            injection::screen(name, raw)?;
        }
        params.insert(name.to_string(), ParamValue::parse(raw));
    }
    Ok(params)
}
