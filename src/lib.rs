#![cfg_attr(not(test), deny(missing_docs))]

//! Dynamic Merkle tree over an ordered sequence of key/value entries.
//!
//! Entries are appended one at a time and can later be removed by key. The root hash is a
//! deterministic function of the entry sequence: the tree always has the canonical shape in
//! which a node covering `n > 1` leaves puts the first `k` leaves on its left, `k` being the
//! largest power of two strictly smaller than `n`, and the remaining `n - k` on its right.
//! Anyone holding the leaf digests in order can recompute the root with [`compute_root`].
//!
//! Nodes cache their digests, so structural updates only rehash the nodes they touch:
//!
//! * [`MerkleTree::insert`] – `O(log n)`; only the right spine changes.
//! * [`MerkleTree::delete`] – `O(log n + (n - p))` for the entry at position `p`. Complete
//!   subtrees before `p` are reused; every later leaf shifts one position down and is
//!   re-paired.
//! * [`MerkleTree::root_hash`] – `O(1)`.
//!
//! Leaf digests are `H(encode(entry))` where the encoding is supplied by a [`LeafEncoder`]
//! ([`JsonEncoder`] by default), and a parent digest is `H(left || right)`.
//!
//! ```
//! use dmtree::{Entry, EntryKey, MerkleTree};
//!
//! let mut tree: MerkleTree = MerkleTree::new();
//! let alice = Entry::new(EntryKey::digest_of(b"alice"), b"pubkey-alice".to_vec());
//! let bob = Entry::new(EntryKey::digest_of(b"bob"), b"pubkey-bob".to_vec());
//!
//! let after_alice = tree.insert(alice).unwrap();
//! tree.insert(bob.clone()).unwrap();
//! assert_eq!(tree.len(), 2);
//!
//! assert_eq!(tree.delete(&bob.key).unwrap(), after_alice);
//! ```

use core::fmt;
use core::iter::Peekable;
use std::collections::{HashMap, HashSet};

use sha2::digest::Output;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

mod encode;
mod error;

pub use encode::{BinaryEncoder, Entry, EntryKey, JsonEncoder, KEY_LENGTH, LeafEncoder};
pub use error::{MerkleError, MerkleResult};

/// Digest output for the default [`Sha256`] hasher used by [`MerkleTree`].
pub type Sha256Hash = Output<Sha256>;

/// Digest output of the hasher `H`.
pub type HashOf<H> = Output<H>;

type Link<H> = Option<Box<Node<H>>>;

/// A complete subtree together with the number of leaves it covers.
type Piece<H> = (usize, Box<Node<H>>);

#[derive(Clone)]
enum Node<H>
where
    H: Digest,
{
    Leaf {
        entry: Entry,
        hash: HashOf<H>,
    },
    Branch {
        left: Box<Node<H>>,
        right: Box<Node<H>>,
        hash: HashOf<H>,
    },
}

impl<H> Node<H>
where
    H: Digest,
{
    #[inline(always)]
    fn hash(&self) -> &HashOf<H> {
        match self {
            Node::Leaf { hash, .. } | Node::Branch { hash, .. } => hash,
        }
    }

    #[inline(always)]
    fn join(left: Box<Self>, right: Box<Self>) -> Box<Self> {
        let hash = combine_hashes::<H>(left.hash(), right.hash());
        Box::new(Node::Branch { left, right, hash })
    }
}

/// Merkle tree over an ordered sequence of [`Entry`] values.
///
/// The tree owns its nodes and keeps an index from each key to the entry's position in the
/// sequence, so deletions locate their leaf without scanning. Mutations take `&mut self` and
/// either succeed completely or leave the tree untouched.
///
/// # Examples
///
/// ```
/// use dmtree::{Entry, EntryKey, MerkleError, MerkleTree, compute_root};
///
/// let mut tree: MerkleTree = MerkleTree::new();
/// for i in 1..=5 {
///     let key = EntryKey::digest_of(format!("key{i}"));
///     tree.insert(Entry::new(key, format!("Node{i}"))).unwrap();
/// }
///
/// let root = tree.root_hash();
/// assert_eq!(compute_root::<sha2::Sha256>(&tree.leaf_hashes()), root);
///
/// let dup = Entry::new(EntryKey::digest_of("key3"), b"other".to_vec());
/// assert!(matches!(tree.insert(dup), Err(MerkleError::DuplicateKey(_))));
/// assert_eq!(tree.root_hash(), root);
/// ```
#[derive(Clone)]
pub struct MerkleTree<E = JsonEncoder, H = Sha256>
where
    E: LeafEncoder,
    H: Digest + Clone,
{
    root: Link<H>,
    size: usize,
    index: HashMap<EntryKey, usize>,
    encoder: E,
}

impl<E, H> MerkleTree<E, H>
where
    E: LeafEncoder,
    H: Digest + Clone,
{
    /// Creates an empty tree using the default leaf encoder.
    #[inline]
    pub fn new() -> Self
    where
        E: Default,
    {
        Self::with_encoder(E::default())
    }

    /// Creates an empty tree that encodes leaves with `encoder`.
    #[inline]
    pub fn with_encoder(encoder: E) -> Self {
        Self {
            root: None,
            size: 0,
            index: HashMap::new(),
            encoder,
        }
    }

    /// Returns the leaf encoder.
    #[inline(always)]
    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Returns the number of entries in the tree.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns whether the tree contains no entries.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the current Merkle root.
    ///
    /// When the tree is empty the zero hash of the digest is returned.
    #[inline(always)]
    pub fn root_hash(&self) -> HashOf<H> {
        self.root
            .as_ref()
            .map(|node| node.hash().clone())
            .unwrap_or_else(zero_hash::<H>)
    }

    /// Returns `true` if an entry with `key` is in the tree.
    #[inline]
    pub fn contains_key(&self, key: &EntryKey) -> bool {
        self.index.contains_key(key)
    }

    /// Returns the zero-based position of the entry with `key` in the sequence.
    #[inline]
    pub fn position(&self, key: &EntryKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Returns the entry stored under `key`.
    pub fn get(&self, key: &EntryKey) -> Option<&Entry> {
        let mut position = self.position(key)?;
        let mut count = self.size;
        let mut node = self.root.as_deref()?;
        loop {
            match node {
                Node::Leaf { entry, .. } => return Some(entry),
                Node::Branch { left, right, .. } => {
                    let split = split_point(count);
                    if position < split {
                        node = left.as_ref();
                        count = split;
                    } else {
                        node = right.as_ref();
                        position -= split;
                        count -= split;
                    }
                }
            }
        }
    }

    /// Iterates over the entries in sequence order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.leaves().map(|(entry, _)| entry)
    }

    /// Returns the leaf digests in sequence order.
    pub fn leaf_hashes(&self) -> Vec<HashOf<H>> {
        self.leaves().map(|(_, hash)| hash.clone()).collect()
    }

    /// Computes the leaf digest `H(encode(entry))` this tree would store for `entry`.
    pub fn leaf_hash(&self, entry: &Entry) -> MerkleResult<HashOf<H>> {
        let material = self.encoder.encode(entry).map_err(MerkleError::encoding)?;
        Ok(H::digest(&material))
    }

    /// Appends `entry` to the sequence and returns the new root.
    ///
    /// Fails with [`MerkleError::DuplicateKey`] when the key is already present and with
    /// [`MerkleError::EncodingFailure`] when the entry can not be encoded. The tree is left
    /// unchanged on error.
    pub fn insert(&mut self, entry: Entry) -> MerkleResult<HashOf<H>> {
        let key = entry.key;
        if self.index.contains_key(&key) {
            return Err(MerkleError::DuplicateKey(key));
        }
        let leaf = self.new_leaf(entry)?;
        let position = self.size;
        self.push_leaf(key, leaf);
        debug!(%key, position, size = self.size, "inserted entry");
        Ok(self.root_hash())
    }

    /// Appends all `entries` in iteration order and returns the new root.
    ///
    /// Every entry is validated and encoded before the tree is modified, so a duplicate key
    /// (against the tree or within the batch) or an encoding failure leaves the tree
    /// unchanged. Appending to an empty tree builds the whole shape in a single pass.
    pub fn insert_batch<I>(&mut self, entries: I) -> MerkleResult<HashOf<H>>
    where
        I: IntoIterator<Item = Entry>,
    {
        let mut seen = HashSet::new();
        let mut incoming = Vec::new();
        for entry in entries {
            let key = entry.key;
            if self.index.contains_key(&key) || !seen.insert(key) {
                return Err(MerkleError::DuplicateKey(key));
            }
            incoming.push((key, self.new_leaf(entry)?));
        }

        let count = incoming.len();
        if self.root.is_none() {
            let mut pieces = Vec::with_capacity(count);
            for (position, (key, leaf)) in incoming.into_iter().enumerate() {
                self.index.insert(key, position);
                pieces.push((1, leaf));
            }
            self.root = build_subtree(&mut pieces.into_iter().peekable(), count);
            self.size = count;
        } else {
            for (key, leaf) in incoming {
                self.push_leaf(key, leaf);
            }
        }
        debug!(inserted = count, size = self.size, "inserted batch");
        Ok(self.root_hash())
    }

    /// Removes the entry stored under `key` and returns the new root.
    ///
    /// Later entries move one position down and the tree takes the canonical shape of the
    /// shortened sequence. Fails with [`MerkleError::KeyNotFound`] when the key is absent,
    /// leaving the tree unchanged.
    pub fn delete(&mut self, key: &EntryKey) -> MerkleResult<HashOf<H>> {
        let position = self
            .position(key)
            .ok_or(MerkleError::KeyNotFound(*key))?;
        if let Some(root) = self.root.take() {
            let mut pieces = Vec::new();
            split_around(root, self.size, position, &mut pieces, &mut self.index);
            trace!(position, pieces = pieces.len(), "re-pairing after delete");
            self.root = build_subtree(&mut pieces.into_iter().peekable(), self.size - 1);
        }
        self.index.remove(key);
        self.size -= 1;
        debug!(%key, position, size = self.size, "deleted entry");
        Ok(self.root_hash())
    }

    /// Returns a [`Display`](fmt::Display) rendering of the tree shape for debugging.
    ///
    /// ```
    /// use dmtree::{Entry, EntryKey, MerkleTree};
    ///
    /// let mut tree: MerkleTree = MerkleTree::new();
    /// tree.insert(Entry::new(EntryKey::digest_of("a"), b"1".to_vec())).unwrap();
    /// tree.insert(Entry::new(EntryKey::digest_of("b"), b"2".to_vec())).unwrap();
    ///
    /// let dump = tree.dump().to_string();
    /// assert!(dump.starts_with("branch [2]"));
    /// assert_eq!(dump.lines().count(), 3);
    /// ```
    pub fn dump(&self) -> TreeDump<'_, H> {
        TreeDump {
            root: self.root.as_deref(),
            size: self.size,
        }
    }

    #[inline]
    fn new_leaf(&self, entry: Entry) -> MerkleResult<Box<Node<H>>> {
        let hash = self.leaf_hash(&entry)?;
        Ok(Box::new(Node::Leaf { entry, hash }))
    }

    fn push_leaf(&mut self, key: EntryKey, leaf: Box<Node<H>>) {
        self.root = Some(match self.root.take() {
            None => leaf,
            Some(root) => append_node(root, self.size, leaf),
        });
        self.index.insert(key, self.size);
        self.size += 1;
    }

    fn leaves(&self) -> Leaves<'_, H> {
        Leaves {
            stack: self.root.as_deref().into_iter().collect(),
        }
    }
}

impl<E, H> Default for MerkleTree<E, H>
where
    E: LeafEncoder + Default,
    H: Digest + Clone,
{
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<E, H> fmt::Debug for MerkleTree<E, H>
where
    E: LeafEncoder,
    H: Digest + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerkleTree")
            .field("size", &self.size)
            .field("root", &hex::encode(self.root_hash()))
            .finish()
    }
}

/// Appends `leaf` to the subtree `node` covering `count` leaves.
///
/// A subtree whose count is a power of two is complete and becomes the left half of a new
/// node; otherwise its left half is already complete and the leaf goes into the right half.
fn append_node<H>(node: Box<Node<H>>, count: usize, leaf: Box<Node<H>>) -> Box<Node<H>>
where
    H: Digest,
{
    if count.is_power_of_two() {
        return Node::join(node, leaf);
    }
    match *node {
        Node::Branch { left, right, .. } => {
            let split = split_point(count);
            Node::join(left, append_node(right, count - split, leaf))
        }
        // unreachable in practice: a lone leaf covers a count of one
        single @ Node::Leaf { .. } => Node::join(Box::new(single), leaf),
    }
}

/// Takes the subtree `node` covering `count` leaves apart around the leaf at `position`.
///
/// Left halves lying wholly before the position are complete and are pushed as they are.
/// The leaf at the position is dropped, and every later leaf is pushed on its own with its
/// index slot moved one down, since its place in the canonical shape changes.
fn split_around<H>(
    node: Box<Node<H>>,
    count: usize,
    position: usize,
    pieces: &mut Vec<Piece<H>>,
    index: &mut HashMap<EntryKey, usize>,
) where
    H: Digest,
{
    let Node::Branch { left, right, .. } = *node else {
        return;
    };

    let split = split_point(count);
    if position < split {
        split_around(left, split, position, pieces, index);
        shift_leaves(right, pieces, index);
    } else {
        pieces.push((split, left));
        split_around(right, count - split, position - split, pieces, index);
    }
}

fn shift_leaves<H>(
    node: Box<Node<H>>,
    pieces: &mut Vec<Piece<H>>,
    index: &mut HashMap<EntryKey, usize>,
) where
    H: Digest,
{
    if let Node::Leaf { entry, .. } = node.as_ref()
        && let Some(slot) = index.get_mut(&entry.key)
    {
        *slot -= 1;
    }
    if matches!(*node, Node::Leaf { .. }) {
        pieces.push((1, node));
    } else if let Node::Branch { left, right, .. } = *node {
        shift_leaves(left, pieces, index);
        shift_leaves(right, pieces, index);
    }
}

/// Builds the canonical subtree over the next `count` leaves held by `pieces`.
///
/// Pieces must be complete subtrees aligned to their own size, as produced by
/// [`split_around`] or single leaves. Every such block is a node of the canonical shape, so a
/// piece is taken whole once the recursion reaches a range of exactly its size.
fn build_subtree<H, I>(pieces: &mut Peekable<I>, count: usize) -> Link<H>
where
    H: Digest,
    I: Iterator<Item = Piece<H>>,
{
    if count == 0 {
        return None;
    }
    let &(size, _) = pieces.peek()?;
    if size == count {
        return pieces.next().map(|(_, node)| node);
    }
    let split = split_point(count);
    let left = build_subtree(pieces, split)?;
    let right = build_subtree(pieces, count - split)?;
    Some(Node::join(left, right))
}

/// Largest power of two strictly smaller than `count` (`count >= 2`).
#[inline(always)]
fn split_point(count: usize) -> usize {
    debug_assert!(count >= 2);
    1 << (count - 1).ilog2()
}

struct Leaves<'a, H>
where
    H: Digest,
{
    stack: Vec<&'a Node<H>>,
}

impl<'a, H> Iterator for Leaves<'a, H>
where
    H: Digest,
{
    type Item = (&'a Entry, &'a HashOf<H>);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match node {
                Node::Leaf { entry, hash } => return Some((entry, hash)),
                Node::Branch { left, right, .. } => {
                    self.stack.push(right);
                    self.stack.push(left);
                }
            }
        }
        None
    }
}

/// Human-readable rendering of a tree's shape, returned by [`MerkleTree::dump`].
///
/// Each line shows a node kind, the number of leaves it covers (for branches) or its key
/// prefix (for leaves), and the first bytes of its digest, indented by depth.
pub struct TreeDump<'a, H>
where
    H: Digest,
{
    root: Option<&'a Node<H>>,
    size: usize,
}

impl<H> fmt::Display for TreeDump<'_, H>
where
    H: Digest,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.root {
            None => writeln!(f, "empty"),
            Some(root) => write_node(f, root, self.size, 0),
        }
    }
}

fn write_node<H>(
    f: &mut fmt::Formatter<'_>,
    node: &Node<H>,
    count: usize,
    depth: usize,
) -> fmt::Result
where
    H: Digest,
{
    let indent = depth * 2;
    match node {
        Node::Leaf { entry, hash } => writeln!(
            f,
            "{:indent$}leaf {} key={}",
            "",
            hex::encode(digest_prefix(hash)),
            hex::encode(digest_prefix(entry.key.as_bytes())),
        ),
        Node::Branch { left, right, hash } => {
            writeln!(
                f,
                "{:indent$}branch [{count}] {}",
                "",
                hex::encode(digest_prefix(hash))
            )?;
            let split = split_point(count);
            write_node(f, left, split, depth + 1)?;
            write_node(f, right, count - split, depth + 1)
        }
    }
}

#[inline(always)]
fn digest_prefix(bytes: &[u8]) -> &[u8] {
    &bytes[..bytes.len().min(4)]
}

/// Computes the root a tree would have over leaves with the given digests, in order.
///
/// Returns the zero hash for an empty slice. This is the reference definition the tree
/// maintains incrementally, usable by parties that only hold the leaf digests.
pub fn compute_root<H: Digest>(leaves: &[HashOf<H>]) -> HashOf<H> {
    match leaves.len() {
        0 => zero_hash::<H>(),
        1 => leaves[0].clone(),
        count => {
            let (left, right) = leaves.split_at(split_point(count));
            combine_hashes::<H>(&compute_root::<H>(left), &compute_root::<H>(right))
        }
    }
}

/// Parent digest `H(left || right)`.
#[inline(always)]
pub fn combine_hashes<H: Digest>(left: &HashOf<H>, right: &HashOf<H>) -> HashOf<H> {
    let mut hasher = H::new();
    hasher.update(left.as_ref());
    hasher.update(right.as_ref());
    hasher.finalize()
}

#[inline(always)]
fn zero_hash<H: Digest>() -> HashOf<H> {
    Output::<H>::default()
}
