use async_trait::async_trait;
use parking_lot::RwLock;
use snip_core::{
    BatchEntry, BatchItem, LinkRecord, Repository, Result, ShortId, ShortIdGenerator, Stats,
    StorageError, UserId,
};
use std::collections::HashSet;
use tracing::{debug, trace};

#[derive(Debug)]
struct Node {
    short_id: ShortId,
    original_url: String,
    owner: UserId,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Chain {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainKind {
    Live,
    Tombstones,
}

/// Node slots plus two doubly linked chains threaded through them.
///
/// Slots are never freed, so an index stays valid for the lifetime of the
/// list. A node is always on exactly one chain.
#[derive(Debug, Default)]
struct LinkedList {
    nodes: Vec<Node>,
    live: Chain,
    tombstones: Chain,
    last_user_id: UserId,
    users: HashSet<UserId>,
}

impl LinkedList {
    fn chain(&self, kind: ChainKind) -> &Chain {
        match kind {
            ChainKind::Live => &self.live,
            ChainKind::Tombstones => &self.tombstones,
        }
    }

    fn chain_mut(&mut self, kind: ChainKind) -> &mut Chain {
        match kind {
            ChainKind::Live => &mut self.live,
            ChainKind::Tombstones => &mut self.tombstones,
        }
    }

    fn iter(&self, kind: ChainKind) -> Iter<'_> {
        Iter {
            nodes: &self.nodes,
            cursor: self.chain(kind).head,
        }
    }

    fn find(&self, kind: ChainKind, id: &ShortId) -> Option<usize> {
        self.iter(kind)
            .find(|(_, node)| &node.short_id == id)
            .map(|(index, _)| index)
    }

    /// Looks the id up on both chains.
    fn locate(&self, id: &ShortId) -> Option<(ChainKind, usize)> {
        self.find(ChainKind::Live, id)
            .map(|index| (ChainKind::Live, index))
            .or_else(|| {
                self.find(ChainKind::Tombstones, id)
                    .map(|index| (ChainKind::Tombstones, index))
            })
    }

    fn push_back(&mut self, kind: ChainKind, index: usize) {
        let tail = self.chain(kind).tail;
        {
            let node = &mut self.nodes[index];
            node.prev = tail;
            node.next = None;
        }
        match tail {
            Some(tail) => self.nodes[tail].next = Some(index),
            None => self.chain_mut(kind).head = Some(index),
        }
        let chain = self.chain_mut(kind);
        chain.tail = Some(index);
        chain.len += 1;
    }

    fn unlink(&mut self, kind: ChainKind, index: usize) {
        let (prev, next) = {
            let node = &self.nodes[index];
            (node.prev, node.next)
        };
        match prev {
            Some(prev) => self.nodes[prev].next = next,
            None => self.chain_mut(kind).head = next,
        }
        match next {
            Some(next) => self.nodes[next].prev = prev,
            None => self.chain_mut(kind).tail = prev,
        }
        let node = &mut self.nodes[index];
        node.prev = None;
        node.next = None;
        self.chain_mut(kind).len -= 1;
    }

    fn insert(&mut self, id: &ShortId, original_url: &str, owner: UserId) -> Result<()> {
        if let Some((_, index)) = self.locate(id) {
            if self.nodes[index].original_url == original_url {
                trace!(short_id = %id, "url already stored");
                return Ok(());
            }
            debug!(short_id = %id, "short id taken by a different url");
            return Err(StorageError::Conflict(id.clone()));
        }

        let index = self.nodes.len();
        self.nodes.push(Node {
            short_id: id.clone(),
            original_url: original_url.to_owned(),
            owner,
            prev: None,
            next: None,
        });
        self.push_back(ChainKind::Live, index);
        self.users.insert(owner);
        self.last_user_id = self.last_user_id.max(owner);
        debug!(short_id = %id, owner, "stored link");
        Ok(())
    }
}

struct Iter<'a> {
    nodes: &'a [Node],
    cursor: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (usize, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let node = &self.nodes[index];
        self.cursor = node.next;
        Some((index, node))
    }
}

/// Linked-list implementation of the [`Repository`] trait.
///
/// There is no hash index: lookups, conflict checks and per-user listings
/// walk the list. It exists to compare against [`InMemoryRepository`]
/// rather than for production use.
///
/// Deleting a link unlinks its node from the live chain and appends it to
/// the tombstone chain, so listings skip it while `get` still reports it as
/// deleted.
///
/// [`InMemoryRepository`]: crate::InMemoryRepository
#[derive(Debug)]
pub struct LinkedListRepository {
    list: RwLock<LinkedList>,
    generator: ShortIdGenerator,
}

impl LinkedListRepository {
    pub fn new(generator: ShortIdGenerator) -> Self {
        Self {
            list: RwLock::new(LinkedList::default()),
            generator,
        }
    }
}

impl Default for LinkedListRepository {
    fn default() -> Self {
        Self::new(ShortIdGenerator::default())
    }
}

#[async_trait]
impl Repository for LinkedListRepository {
    async fn add(&self, original_url: &str, owner: UserId) -> Result<ShortId> {
        let id = self.generator.generate(original_url);
        self.list.write().insert(&id, original_url, owner)?;
        Ok(id)
    }

    async fn add_batch(&self, items: &[BatchItem], owner: UserId) -> Result<Vec<BatchEntry>> {
        if items.is_empty() {
            return Err(StorageError::EmptyRequest);
        }

        let mut entries = Vec::with_capacity(items.len());
        let mut list = self.list.write();
        for item in items {
            let id = self.generator.generate(&item.original_url);
            match list.insert(&id, &item.original_url, owner) {
                Ok(()) => entries.push(BatchEntry {
                    correlation_id: item.correlation_id.clone(),
                    short_id: id,
                }),
                Err(StorageError::Conflict(_)) => {
                    debug!(correlation_id = %item.correlation_id, short_id = %id, "skipping conflicting batch item");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }

    async fn get(&self, id: &ShortId) -> Result<String> {
        let list = self.list.read();
        match list.locate(id) {
            None => Err(StorageError::NotFound(id.clone())),
            Some((ChainKind::Tombstones, _)) => Err(StorageError::Deleted(id.clone())),
            Some((ChainKind::Live, index)) => Ok(list.nodes[index].original_url.clone()),
        }
    }

    async fn user_links(&self, owner: UserId) -> Result<Vec<LinkRecord>> {
        let list = self.list.read();
        let records = list
            .iter(ChainKind::Live)
            .filter(|(_, node)| node.owner == owner)
            .map(|(_, node)| LinkRecord {
                short_id: node.short_id.clone(),
                original_url: node.original_url.clone(),
                owner,
                deleted: false,
            })
            .collect();
        Ok(records)
    }

    async fn new_user(&self) -> Result<UserId> {
        let mut list = self.list.write();
        let id = list
            .last_user_id
            .checked_add(1)
            .ok_or_else(|| StorageError::InvalidData("user id space exhausted".to_string()))?;
        list.last_user_id = id;
        list.users.insert(id);
        debug!(user_id = id, "allocated user");
        Ok(id)
    }

    async fn delete_batch(&self, owner: UserId, ids: &[ShortId]) -> Result<()> {
        if ids.is_empty() {
            return Err(StorageError::EmptyRequest);
        }

        let mut list = self.list.write();
        for id in ids {
            let Some(index) = list.find(ChainKind::Live, id) else {
                continue;
            };
            if list.nodes[index].owner != owner {
                continue;
            }
            list.unlink(ChainKind::Live, index);
            list.push_back(ChainKind::Tombstones, index);
            debug!(short_id = %id, owner, "tombstoned link");
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn stats(&self) -> Result<Stats> {
        let list = self.list.read();
        Ok(Stats {
            urls: list.live.len as u64,
            users: list.users.len() as u64,
        })
    }
}
