//! In-memory namespace tree
//!
//! Inodes are keyed by id and linked by name from the root. The tree has no
//! durability logic: every mutation validates first and only then touches
//! state, so a failed call leaves the tree exactly as it was. The journal
//! replays entries through [`NamespaceTree::apply`], which calls the same
//! mutation methods the metadata store uses.

use crate::entry::{JournalEntry, JournalOp};
use crate::inode::{FileAttrs, Inode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tidefs_common::{
    BlockId, Error, FsPath, InodeId, ROOT_INODE_ID, Result, table_column_name,
};

/// Monotonic inode id allocator
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdAllocator {
    last: InodeId,
}

impl IdAllocator {
    /// Allocator that has handed out every id up to `last`
    #[must_use]
    pub const fn from_watermark(last: InodeId) -> Self {
        Self { last }
    }

    /// Hand out the next id
    pub const fn allocate(&mut self) -> InodeId {
        self.last += 1;
        self.last
    }

    /// Make sure `id` is never handed out again
    pub fn advance_past(&mut self, id: InodeId) {
        self.last = self.last.max(id);
    }

    /// Highest id handed out so far
    #[must_use]
    pub const fn watermark(&self) -> InodeId {
        self.last
    }
}

/// One entry of a listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub id: InodeId,
    pub path: FsPath,
}

struct CreatePlan {
    parent: InodeId,
    /// Ancestors that a recursive create must add under `parent`
    missing: Vec<String>,
    name: String,
}

/// The namespace: a rooted tree of inodes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceTree {
    inodes: HashMap<InodeId, Inode>,
    ids: IdAllocator,
}

impl NamespaceTree {
    /// A namespace holding only the root directory
    #[must_use]
    pub fn new(time_ms: u64) -> Self {
        let mut ids = IdAllocator::default();
        let root = ids.allocate();
        debug_assert_eq!(root, ROOT_INODE_ID);

        let mut inodes = HashMap::new();
        inodes.insert(root, Inode::directory(root, None, "", time_ms));
        Self { inodes, ids }
    }

    /// Rebuild a tree from inodes listed parents-first.
    ///
    /// Fails if the listing does not describe a single rooted tree whose
    /// ids all lie at or below `watermark`.
    pub fn from_parts(watermark: InodeId, inodes: Vec<Inode>) -> Result<Self> {
        let mut map: HashMap<InodeId, Inode> = HashMap::with_capacity(inodes.len());
        for inode in inodes {
            if inode.id > watermark {
                return Err(Error::corruption(format!(
                    "inode {} above id watermark {watermark}",
                    inode.id
                )));
            }
            match inode.parent {
                None if inode.id != ROOT_INODE_ID || !map.is_empty() => {
                    return Err(Error::corruption(format!(
                        "inode {} has no parent and is not the root",
                        inode.id
                    )));
                }
                None if !inode.is_directory() => {
                    return Err(Error::corruption("root is not a directory"));
                }
                None => {}
                Some(parent_id) => {
                    let linked = map
                        .get(&parent_id)
                        .and_then(Inode::children)
                        .and_then(|c| c.get(&inode.name));
                    if linked != Some(&inode.id) {
                        return Err(Error::corruption(format!(
                            "inode {} is not linked from parent {parent_id} as '{}'",
                            inode.id, inode.name
                        )));
                    }
                }
            }
            let id = inode.id;
            if map.insert(id, inode).is_some() {
                return Err(Error::corruption(format!("duplicate inode {id}")));
            }
        }

        if !map.contains_key(&ROOT_INODE_ID) {
            return Err(Error::corruption("image has no root"));
        }
        for inode in map.values() {
            for (name, child) in inode.children().into_iter().flatten() {
                let Some(listed) = map.get(child) else {
                    return Err(Error::corruption(format!(
                        "inode {} lists missing child {child}",
                        inode.id
                    )));
                };
                if listed.parent != Some(inode.id) || &listed.name != name {
                    return Err(Error::corruption(format!(
                        "inode {} lists child {child} as '{name}', but it belongs to {:?} as '{}'",
                        inode.id, listed.parent, listed.name
                    )));
                }
            }
        }

        Ok(Self {
            inodes: map,
            ids: IdAllocator::from_watermark(watermark),
        })
    }

    /// Number of inodes, root included
    #[must_use]
    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    /// A tree always holds at least the root
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    #[must_use]
    pub const fn allocator(&self) -> IdAllocator {
        self.ids
    }

    #[must_use]
    pub fn root(&self) -> &Inode {
        &self.inodes[&ROOT_INODE_ID]
    }

    pub fn get(&self, id: InodeId) -> Result<&Inode> {
        self.inodes.get(&id).ok_or(Error::IdNotFound(id))
    }

    fn get_mut(&mut self, id: InodeId) -> Result<&mut Inode> {
        self.inodes.get_mut(&id).ok_or(Error::IdNotFound(id))
    }

    /// Inodes in pre-order (parents before children, siblings by name)
    #[must_use]
    pub fn preorder(&self) -> Vec<&Inode> {
        let mut out = Vec::with_capacity(self.inodes.len());
        let mut stack = vec![ROOT_INODE_ID];
        while let Some(id) = stack.pop() {
            let Some(inode) = self.inodes.get(&id) else {
                continue;
            };
            out.push(inode);
            if let Some(children) = inode.children() {
                stack.extend(children.values().rev());
            }
        }
        out
    }

    /// Resolve a path to an inode id
    pub fn resolve(&self, path: &FsPath) -> Result<InodeId> {
        let mut current = ROOT_INODE_ID;
        for name in path.components() {
            current = self
                .inodes
                .get(&current)
                .and_then(Inode::children)
                .and_then(|c| c.get(name))
                .copied()
                .ok_or_else(|| Error::path_not_found(path))?;
        }
        Ok(current)
    }

    /// Path of an inode
    pub fn path_of(&self, id: InodeId) -> Result<FsPath> {
        let mut names = Vec::new();
        let mut inode = self.get(id)?;
        while let Some(parent) = inode.parent {
            names.push(inode.name.as_str());
            inode = self.get(parent)?;
        }
        names
            .into_iter()
            .rev()
            .try_fold(FsPath::root(), |path, name| path.join(name))
    }

    /// List `path` itself followed by its children, or by every
    /// descendant in pre-order when `recursive`
    pub fn list(&self, path: &FsPath, recursive: bool) -> Result<Vec<ListEntry>> {
        let id = self.resolve(path)?;
        let mut out = Vec::new();
        let mut stack = vec![(id, path.clone(), true)];
        while let Some((id, path, expand)) = stack.pop() {
            let inode = self.get(id)?;
            if expand {
                if let Some(children) = inode.children() {
                    for (name, child) in children.iter().rev() {
                        stack.push((*child, path.join(name)?, recursive));
                    }
                }
            }
            out.push(ListEntry { id, path });
        }
        Ok(out)
    }

    fn plan_create(&self, path: &FsPath, recursive: bool) -> Result<CreatePlan> {
        let Some(name) = path.name() else {
            return Err(Error::invalid_path("cannot create the root"));
        };
        let ancestors = &path.components()[..path.depth() - 1];

        let mut parent = ROOT_INODE_ID;
        for (depth, component) in ancestors.iter().enumerate() {
            let Some(children) = self.get(parent)?.children() else {
                return Err(Error::NotADirectory(self.path_of(parent)?.to_string()));
            };
            match children.get(component) {
                Some(child) => parent = *child,
                None if recursive => {
                    return Ok(CreatePlan {
                        parent,
                        missing: ancestors[depth..].to_vec(),
                        name: name.to_string(),
                    });
                }
                None => {
                    return Err(Error::path_not_found(
                        path.parent().unwrap_or_else(FsPath::root),
                    ));
                }
            }
        }

        let Some(children) = self.get(parent)?.children() else {
            return Err(Error::NotADirectory(self.path_of(parent)?.to_string()));
        };
        if children.contains_key(name) {
            return Err(Error::PathAlreadyExists(path.to_string()));
        }
        Ok(CreatePlan {
            parent,
            missing: Vec::new(),
            name: name.to_string(),
        })
    }

    /// Link a new inode under its parent
    fn attach(&mut self, inode: Inode, time_ms: u64) {
        let parent_id = inode.parent.unwrap_or(ROOT_INODE_ID);
        if let Some(parent) = self.inodes.get_mut(&parent_id) {
            parent.last_modification_time_ms = time_ms;
            if let Some(children) = parent.children_mut() {
                children.insert(inode.name.clone(), inode.id);
            }
        }
        self.inodes.insert(inode.id, inode);
    }

    /// Create the ancestors a plan is missing; returns the leaf's parent
    fn create_missing(&mut self, plan: &CreatePlan, time_ms: u64) -> InodeId {
        let mut parent = plan.parent;
        for name in &plan.missing {
            let id = self.ids.allocate();
            self.attach(Inode::directory(id, Some(parent), name.as_str(), time_ms), time_ms);
            parent = id;
        }
        parent
    }

    /// Create an empty, incomplete file
    pub fn create_file(
        &mut self,
        path: &FsPath,
        recursive: bool,
        block_size: u64,
        cache: bool,
        time_ms: u64,
    ) -> Result<InodeId> {
        if block_size == 0 {
            return Err(Error::BlockInfo(format!("{path}: block size must be positive")));
        }
        let plan = self.plan_create(path, recursive)?;
        let parent = self.create_missing(&plan, time_ms);
        let id = self.ids.allocate();
        let attrs = FileAttrs::new(block_size, cache);
        self.attach(Inode::file(id, parent, plan.name, time_ms, attrs), time_ms);
        Ok(id)
    }

    /// Create a directory
    pub fn create_directory(&mut self, path: &FsPath, recursive: bool, time_ms: u64) -> Result<InodeId> {
        let plan = self.plan_create(path, recursive)?;
        let parent = self.create_missing(&plan, time_ms);
        let id = self.ids.allocate();
        self.attach(Inode::directory(id, Some(parent), plan.name, time_ms), time_ms);
        Ok(id)
    }

    /// Create a table with `columns` column directories
    pub fn create_table(
        &mut self,
        path: &FsPath,
        columns: u32,
        metadata: Vec<u8>,
        time_ms: u64,
    ) -> Result<InodeId> {
        if columns == 0 {
            return Err(Error::TableColumn(format!("{path}: a table needs columns")));
        }
        let plan = self.plan_create(path, false)?;
        let id = self.ids.allocate();
        self.attach(
            Inode::table(id, plan.parent, plan.name, time_ms, columns, metadata),
            time_ms,
        );
        for column in 0..columns {
            let column_id = self.ids.allocate();
            self.attach(
                Inode::directory(column_id, Some(id), table_column_name(column), time_ms),
                time_ms,
            );
        }
        Ok(id)
    }

    /// Replace a table's metadata blob
    pub fn update_table_metadata(&mut self, id: InodeId, metadata: Vec<u8>, time_ms: u64) -> Result<()> {
        let inode = self.get_mut(id)?;
        let Some(table) = inode.as_table_mut() else {
            return Err(Error::NotATable(id.to_string()));
        };
        table.metadata = metadata;
        inode.last_modification_time_ms = time_ms;
        Ok(())
    }

    /// Append block `index` to a file
    pub fn add_block(&mut self, file_id: InodeId, index: u32, length: u64) -> Result<BlockId> {
        let inode = self.get_mut(file_id)?;
        let Some(attrs) = inode.as_file_mut() else {
            return Err(Error::NotAFile(file_id.to_string()));
        };
        attrs.add_block(file_id, index, length)
    }

    /// Mark a file complete
    pub fn complete_file(&mut self, file_id: InodeId, time_ms: u64) -> Result<()> {
        let inode = self.get_mut(file_id)?;
        let Some(attrs) = inode.as_file_mut() else {
            return Err(Error::NotAFile(file_id.to_string()));
        };
        if !attrs.complete {
            attrs.complete = true;
            inode.last_modification_time_ms = time_ms;
        }
        Ok(())
    }

    /// Record the under-storage copy of a file.
    ///
    /// Returns false when the file was already checkpointed with a matching
    /// length, in which case nothing changed.
    pub fn add_checkpoint(
        &mut self,
        file_id: InodeId,
        length: u64,
        checkpoint_path: &str,
        time_ms: u64,
    ) -> Result<bool> {
        let inode = self.get_mut(file_id)?;
        let Some(attrs) = inode.as_file_mut() else {
            return Err(Error::NotAFile(file_id.to_string()));
        };

        let mut changed = false;
        if attrs.complete {
            if attrs.length != length {
                return Err(Error::SuspectedFileSize {
                    id: file_id,
                    expected: attrs.length,
                    actual: length,
                });
            }
        } else {
            attrs.length = length;
            attrs.complete = true;
            changed = true;
        }
        if attrs.checkpoint_path.is_none() {
            attrs.checkpoint_path = Some(checkpoint_path.to_string());
            changed = true;
        }
        if changed {
            inode.last_modification_time_ms = time_ms;
        }
        Ok(changed)
    }

    /// Set the pinned flag of exactly this inode
    pub fn set_pinned(&mut self, id: InodeId, pinned: bool, time_ms: u64) -> Result<()> {
        let inode = self.get_mut(id)?;
        inode.pinned = pinned;
        inode.last_modification_time_ms = time_ms;
        Ok(())
    }

    /// Move an inode to `dst`
    pub fn rename(&mut self, id: InodeId, dst: &FsPath, time_ms: u64) -> Result<()> {
        let src = self.path_of(id)?;
        if src.is_root() || dst.is_root() {
            return Err(Error::invalid_path("cannot rename to or from the root"));
        }
        if &src == dst {
            return Ok(());
        }
        if dst.starts_with(&src) {
            return Err(Error::invalid_path(format!("cannot move {src} beneath itself to {dst}")));
        }

        let dst_parent_path = dst.parent().unwrap_or_else(FsPath::root);
        let dst_parent = self.resolve(&dst_parent_path)?;
        let Some(children) = self.get(dst_parent)?.children() else {
            return Err(Error::NotADirectory(dst_parent_path.to_string()));
        };
        let Some(dst_name) = dst.name() else {
            return Err(Error::invalid_path("cannot rename to the root"));
        };
        if children.contains_key(dst_name) {
            return Err(Error::PathAlreadyExists(dst.to_string()));
        }

        let inode = self.get_mut(id)?;
        let src_parent = inode.parent.unwrap_or(ROOT_INODE_ID);
        let src_name = std::mem::replace(&mut inode.name, dst_name.to_string());
        inode.parent = Some(dst_parent);

        let parent = self.get_mut(src_parent)?;
        parent.last_modification_time_ms = time_ms;
        if let Some(children) = parent.children_mut() {
            children.remove(&src_name);
        }
        let parent = self.get_mut(dst_parent)?;
        parent.last_modification_time_ms = time_ms;
        if let Some(children) = parent.children_mut() {
            children.insert(dst_name.to_string(), id);
        }
        Ok(())
    }

    /// Delete an inode and, when `recursive`, everything beneath it.
    ///
    /// Deleting the root clears its children and keeps the root itself.
    /// Returns the removed inodes.
    pub fn delete(&mut self, id: InodeId, recursive: bool, time_ms: u64) -> Result<Vec<Inode>> {
        let inode = self.get(id)?;
        if !recursive && inode.children().is_some_and(|c| !c.is_empty()) {
            return Err(Error::DirectoryNotEmpty(self.path_of(id)?.to_string()));
        }

        let mut doomed = Vec::new();
        let mut stack = if id == ROOT_INODE_ID {
            inode.children().into_iter().flat_map(|c| c.values().copied()).collect()
        } else {
            vec![id]
        };
        while let Some(next) = stack.pop() {
            if let Some(children) = self.get(next)?.children() {
                stack.extend(children.values().copied());
            }
            doomed.push(next);
        }

        let removed: Vec<Inode> = doomed
            .iter()
            .filter_map(|id| self.inodes.remove(id))
            .collect();

        let parent_id = if id == ROOT_INODE_ID {
            ROOT_INODE_ID
        } else {
            removed
                .first()
                .and_then(|inode| inode.parent)
                .unwrap_or(ROOT_INODE_ID)
        };
        let parent = self.get_mut(parent_id)?;
        parent.last_modification_time_ms = time_ms;
        if let Some(children) = parent.children_mut() {
            if id == ROOT_INODE_ID {
                children.clear();
            } else {
                children.retain(|_, child| *child != id);
            }
        }
        Ok(removed)
    }

    /// Apply a journal entry exactly as the original request did
    pub fn apply(&mut self, entry: &JournalEntry) -> Result<()> {
        let time_ms = entry.op_time_ms;
        match &entry.op {
            JournalOp::CreateFile {
                id,
                path,
                recursive,
                block_size,
                cache,
            } => {
                let created = self.create_file(path, *recursive, *block_size, *cache, time_ms)?;
                expect_created(entry, *id, created)?;
            }
            JournalOp::CreateDirectory {
                id,
                path,
                recursive,
            } => {
                let created = self.create_directory(path, *recursive, time_ms)?;
                expect_created(entry, *id, created)?;
            }
            JournalOp::CreateTable {
                id,
                path,
                columns,
                metadata,
            } => {
                let created = self.create_table(path, *columns, metadata.clone(), time_ms)?;
                expect_created(entry, *id, created)?;
            }
            JournalOp::UpdateTableMetadata { id, metadata } => {
                self.update_table_metadata(*id, metadata.clone(), time_ms)?;
            }
            JournalOp::AddBlock {
                file_id,
                index,
                length,
            } => {
                self.add_block(*file_id, *index, *length)?;
            }
            JournalOp::AddCheckpoint {
                file_id,
                length,
                checkpoint_path,
            } => {
                self.add_checkpoint(*file_id, *length, checkpoint_path, time_ms)?;
            }
            JournalOp::CompleteFile { file_id } => self.complete_file(*file_id, time_ms)?,
            JournalOp::SetPinned { id, pinned } => self.set_pinned(*id, *pinned, time_ms)?,
            JournalOp::Rename { id, dst } => self.rename(*id, dst, time_ms)?,
            JournalOp::Delete { id, recursive } => {
                self.delete(*id, *recursive, time_ms)?;
            }
        }
        self.ids.advance_past(entry.op.max_referenced_id());
        Ok(())
    }
}

fn expect_created(entry: &JournalEntry, logged: InodeId, created: InodeId) -> Result<()> {
    if logged == created {
        Ok(())
    } else {
        Err(Error::corruption(format!(
            "txn {}: {} produced inode {created}, journal recorded {logged}",
            entry.txn_id,
            entry.op.name()
        )))
    }
}
