//! Scope manager
//!
//! A scope is a composable, cacheable view: a set of sources (devices and/or
//! other scopes) intersected per device with a set of tag filters, unioned
//! across sources. For a device source the scope yields the files carrying
//! every filter tag; a sub-scope source contributes its own result verbatim,
//! since it is already filtered.
//!
//! Caches are materialized on demand and invalidated along two paths: any
//! structural mutation of a scope dirties it and every transitive dependent,
//! and any tag change dirties every scope filtering on that tag (tracked by
//! the tag→scopes index) plus dependents. The sub-scope graph is kept
//! acyclic; back edges (`dependents`) mirror the forward source edges so
//! invalidation can walk forward.

use crate::tag::canonical_tag_name;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tagfs_common::{Error, FileId, FileRef, IdGenerator, Result, ScopeId, Source, TagId};

/// Read access to the tag inverted index, as much as scopes need of it
pub trait TagListProvider: Send + Sync {
    /// Look up the tag id for a name
    fn find_tag_id(&self, name: &str) -> Option<TagId>;
    /// File ids carrying the tag; empty for an unknown id
    fn files(&self, tag_id: TagId) -> Vec<FileId>;
}

impl TagListProvider for crate::tag::TagList {
    fn find_tag_id(&self, name: &str) -> Option<TagId> {
        Self::find_tag_id(self, name)
    }

    fn files(&self, tag_id: TagId) -> Vec<FileId> {
        Self::files(self, tag_id)
    }
}

struct Scope {
    sources: HashSet<Source>,
    filters: HashSet<String>,
    cache: HashSet<FileRef>,
    cache_valid: bool,
    /// Scopes that list this scope as a source
    dependents: HashSet<ScopeId>,
}

impl Scope {
    fn new() -> Self {
        Self {
            sources: HashSet::new(),
            filters: HashSet::new(),
            cache: HashSet::new(),
            cache_valid: false,
            dependents: HashSet::new(),
        }
    }
}

#[derive(Default)]
struct ScopeMgrInner {
    scopes: HashMap<ScopeId, Scope>,
    /// Per-filter dependency index: tag name → scopes filtering on it
    tag_to_scopes: HashMap<String, HashSet<ScopeId>>,
}

/// Manager of scopes and their materialized caches
pub struct ScopeManager {
    inner: RwLock<ScopeMgrInner>,
    id_gen: Arc<IdGenerator>,
    tags: Arc<dyn TagListProvider>,
}

impl ScopeManager {
    /// Create an empty manager over the given tag index
    #[must_use]
    pub fn new(id_gen: Arc<IdGenerator>, tags: Arc<dyn TagListProvider>) -> Self {
        Self {
            inner: RwLock::new(ScopeMgrInner::default()),
            id_gen,
            tags,
        }
    }

    /// Create an empty scope
    pub fn mk_scope(&self) -> ScopeId {
        let scope_id = self.id_gen.next_scope();
        self.inner.write().scopes.insert(scope_id, Scope::new());
        scope_id
    }

    /// Add a source to a scope
    ///
    /// A sub-scope source is checked against the scope graph first:
    /// self-reference and anything that would close a cycle are rejected.
    pub fn add_source(&self, scope_id: ScopeId, source: Source) -> Result<()> {
        let mut inner = self.inner.write();

        if !inner.scopes.contains_key(&scope_id) {
            return Err(Error::ScopeNotFound { scope_id });
        }

        if let Source::SubScope(sub) = source {
            if sub == scope_id {
                return Err(Error::SelfReference);
            }
            if Self::reaches(&inner, sub, scope_id) {
                return Err(Error::CycleDetected);
            }
            if let Some(sub_scope) = inner.scopes.get_mut(&sub) {
                sub_scope.dependents.insert(scope_id);
            }
        }

        if let Some(scope) = inner.scopes.get_mut(&scope_id) {
            scope.sources.insert(source);
        }
        Self::invalidate(&mut inner, scope_id);
        Ok(())
    }

    /// Remove a source from a scope; absent sources are a no-op
    pub fn rm_source(&self, scope_id: ScopeId, source: Source) -> Result<()> {
        let mut inner = self.inner.write();

        let scope = inner
            .scopes
            .get_mut(&scope_id)
            .ok_or(Error::ScopeNotFound { scope_id })?;
        scope.sources.remove(&source);

        if let Source::SubScope(sub) = source
            && let Some(sub_scope) = inner.scopes.get_mut(&sub)
        {
            sub_scope.dependents.remove(&scope_id);
        }

        Self::invalidate(&mut inner, scope_id);
        Ok(())
    }

    /// Add filter tags to a scope
    pub fn add_filter(&self, scope_id: ScopeId, tags: &[&str]) -> Result<()> {
        let mut inner = self.inner.write();

        if !inner.scopes.contains_key(&scope_id) {
            return Err(Error::ScopeNotFound { scope_id });
        }

        for tag in tags {
            let name = canonical_tag_name(tag);
            if let Some(scope) = inner.scopes.get_mut(&scope_id) {
                scope.filters.insert(name.clone());
            }
            inner
                .tag_to_scopes
                .entry(name)
                .or_default()
                .insert(scope_id);
        }

        Self::invalidate(&mut inner, scope_id);
        Ok(())
    }

    /// Remove filter tags from a scope
    pub fn rm_filter(&self, scope_id: ScopeId, tags: &[&str]) -> Result<()> {
        let mut inner = self.inner.write();

        if !inner.scopes.contains_key(&scope_id) {
            return Err(Error::ScopeNotFound { scope_id });
        }

        for tag in tags {
            let name = canonical_tag_name(tag);
            if let Some(scope) = inner.scopes.get_mut(&scope_id) {
                scope.filters.remove(&name);
            }
            if let Some(set) = inner.tag_to_scopes.get_mut(&name) {
                set.remove(&scope_id);
                if set.is_empty() {
                    inner.tag_to_scopes.remove(&name);
                }
            }
        }

        Self::invalidate(&mut inner, scope_id);
        Ok(())
    }

    /// Materialize and return the scope's result set, sorted
    ///
    /// Returns the cache verbatim when it is valid; otherwise recomputes,
    /// stores, and marks it valid. Sub-scopes materialized along the way
    /// keep their caches too.
    pub fn list(&self, scope_id: ScopeId) -> Result<Vec<FileRef>> {
        let mut inner = self.inner.write();
        let result = Self::list_locked(&mut inner, self.tags.as_ref(), scope_id)?;

        let mut result: Vec<FileRef> = result.into_iter().collect();
        result.sort_unstable();
        Ok(result)
    }

    fn list_locked(
        inner: &mut ScopeMgrInner,
        tags: &dyn TagListProvider,
        scope_id: ScopeId,
    ) -> Result<HashSet<FileRef>> {
        let scope = inner
            .scopes
            .get(&scope_id)
            .ok_or(Error::ScopeNotFound { scope_id })?;

        if scope.cache_valid {
            return Ok(scope.cache.clone());
        }

        let sources: Vec<Source> = scope.sources.iter().copied().collect();
        let filters: Vec<String> = scope.filters.iter().cloned().collect();

        let mut result = HashSet::new();
        for source in sources {
            match source {
                Source::Device(device) => {
                    for file in Self::evaluate_device_source(tags, &filters) {
                        result.insert(FileRef::new(device, file));
                    }
                }
                Source::SubScope(sub) => {
                    // A dangling sub-scope reference contributes nothing
                    if let Ok(sub_result) = Self::list_locked(inner, tags, sub) {
                        result.extend(sub_result);
                    }
                }
            }
        }

        let scope = inner
            .scopes
            .get_mut(&scope_id)
            .ok_or(Error::ScopeNotFound { scope_id })?;
        scope.cache = result.clone();
        scope.cache_valid = true;
        Ok(result)
    }

    /// Files carrying every filter tag; empty when there are no filters or
    /// any filter tag does not exist
    fn evaluate_device_source(tags: &dyn TagListProvider, filters: &[String]) -> HashSet<FileId> {
        if filters.is_empty() {
            return HashSet::new();
        }

        let mut sets: Vec<HashSet<FileId>> = Vec::with_capacity(filters.len());
        for name in filters {
            let Some(tag_id) = tags.find_tag_id(name) else {
                return HashSet::new();
            };
            sets.push(tags.files(tag_id).into_iter().collect());
        }

        // Intersect starting from the smallest set
        sets.sort_unstable_by_key(HashSet::len);
        let (first, rest) = match sets.split_first() {
            Some(split) => split,
            None => return HashSet::new(),
        };
        first
            .iter()
            .filter(|fid| rest.iter().all(|s| s.contains(fid)))
            .copied()
            .collect()
    }

    /// Invalidate every scope filtering on `tag`, and their dependents
    pub fn invalidate_tag(&self, tag: &str) {
        let name = canonical_tag_name(tag);
        let mut inner = self.inner.write();

        let affected: Vec<ScopeId> = match inner.tag_to_scopes.get(&name) {
            Some(set) => set.iter().copied().collect(),
            None => return,
        };
        for scope_id in affected {
            Self::invalidate(&mut inner, scope_id);
        }
    }

    /// Drop the cache of `scope_id` and every transitive dependent
    fn invalidate(inner: &mut ScopeMgrInner, scope_id: ScopeId) {
        let mut stack = vec![scope_id];
        let mut visited = HashSet::new();

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(scope) = inner.scopes.get_mut(&current) {
                scope.cache_valid = false;
                scope.cache.clear();
                stack.extend(scope.dependents.iter().copied());
            }
        }
    }

    /// Check whether `from` reaches `target` along sub-scope source edges
    fn reaches(inner: &ScopeMgrInner, from: ScopeId, target: ScopeId) -> bool {
        let mut stack = vec![from];
        let mut visited = HashSet::new();

        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(scope) = inner.scopes.get(&current) {
                for source in &scope.sources {
                    if let Source::SubScope(sub) = source {
                        stack.push(*sub);
                    }
                }
            }
        }
        false
    }

    #[cfg(test)]
    fn cache_valid(&self, scope_id: ScopeId) -> bool {
        self.inner
            .read()
            .scopes
            .get(&scope_id)
            .is_some_and(|s| s.cache_valid)
    }
}
