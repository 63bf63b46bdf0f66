//! Merkle-Patricia trie root computation.
//!
//! Nodes are built bottom-up from the full sorted key set (the account trie
//! or one account's storage trie). [`trie_root_with_nodes`] also hands back
//! the hashed nodes for storage.

pub mod nibbles;

use std::collections::BTreeMap;

use cel2_rlp::{constants::RLP_NULL, encode::RLPEncode, structs::Encoder};
use ethereum_types::H256;
use hex_literal::hex;
use sha3::{Digest, Keccak256};

pub use nibbles::{Nibbles, encode_compact};

/// Root of the empty trie: `keccak256(rlp(""))`.
pub const EMPTY_TRIE_HASH: H256 = H256(hex!(
    "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
));

fn keccak(data: &[u8]) -> H256 {
    H256(Keccak256::digest(data).into())
}

/// Hash-referenced nodes of a trie, as `(keccak(node), node)`. The root node
/// is always included, whatever its size.
pub type TrieNodes = Vec<(H256, Vec<u8>)>;

/// Computes the root of the trie holding `entries`.
/// Empty values are treated as absent keys. Duplicate keys keep the last value.
pub fn trie_root<I, K, V>(entries: I) -> H256
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    build_trie(entries, &mut None)
}

/// Same as [`trie_root`], also returning every node that is referenced by
/// hash, so the trie can be stored in a hash-keyed node database.
pub fn trie_root_with_nodes<I, K, V>(entries: I) -> (H256, TrieNodes)
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let mut nodes = TrieNodes::new();
    let root = build_trie(entries, &mut Some(&mut nodes));
    (root, nodes)
}

fn build_trie<I, K, V>(entries: I, nodes: &mut Option<&mut TrieNodes>) -> H256
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let sorted: BTreeMap<Nibbles, Vec<u8>> = entries
        .into_iter()
        .map(|(key, value)| (Nibbles::from_bytes(key.as_ref()), value.as_ref().to_vec()))
        .collect();
    let leaves: Vec<(Nibbles, Vec<u8>)> = sorted
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect();
    if leaves.is_empty() {
        return EMPTY_TRIE_HASH;
    }
    let root = encode_node(&leaves, 0, nodes);
    let hash = keccak(&root);
    if let Some(nodes) = nodes.as_deref_mut() {
        nodes.push((hash, root));
    }
    hash
}

/// Same as [`trie_root`] with every key replaced by its keccak256 hash.
pub fn secure_trie_root<I, K, V>(entries: I) -> H256
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    trie_root(
        entries
            .into_iter()
            .map(|(key, value)| (keccak(key.as_ref()), value)),
    )
}

/// Encodes the subtrie holding `leaves`, all of which share their first
/// `depth` nibbles. `leaves` must be sorted and non-empty.
fn encode_node(
    leaves: &[(Nibbles, Vec<u8>)],
    depth: usize,
    nodes: &mut Option<&mut TrieNodes>,
) -> Vec<u8> {
    let mut buf = Vec::new();

    if let [(path, value)] = leaves {
        Encoder::new(&mut buf)
            .encode_field(&encode_compact(&path.as_slice()[depth..], true)[..])
            .encode_field(&value[..])
            .finish();
        return buf;
    }

    let first = &leaves[0].0;
    let last = &leaves[leaves.len() - 1].0;
    let shared = first.common_prefix_len(last, depth);
    if shared > 0 {
        let child = encode_node(leaves, depth + shared, nodes);
        Encoder::new(&mut buf)
            .encode_field(&encode_compact(&first.as_slice()[depth..depth + shared], false)[..])
            .encode_raw(&child_reference(child, nodes))
            .finish();
        return buf;
    }

    let mut rest = leaves;
    let mut branch_value = None;
    if rest[0].0.len() == depth {
        branch_value = Some(&rest[0].1);
        rest = &rest[1..];
    }

    let mut encoder = Encoder::new(&mut buf);
    for nibble in 0..16u8 {
        let split = rest
            .iter()
            .take_while(|(path, _)| path.at(depth) == nibble)
            .count();
        let (group, tail) = rest.split_at(split);
        encoder = if group.is_empty() {
            encoder.encode_raw(&[RLP_NULL])
        } else {
            let child = encode_node(group, depth + 1, nodes);
            encoder.encode_raw(&child_reference(child, nodes))
        };
        rest = tail;
    }
    encoder = match branch_value {
        Some(value) => encoder.encode_field(&value[..]),
        None => encoder.encode_raw(&[RLP_NULL]),
    };
    encoder.finish();
    buf
}

/// Nodes shorter than a hash are inlined into their parent.
fn child_reference(node: Vec<u8>, nodes: &mut Option<&mut TrieNodes>) -> Vec<u8> {
    if node.len() < 32 {
        return node;
    }
    let hash = keccak(&node);
    if let Some(nodes) = nodes.as_deref_mut() {
        nodes.push((hash, node));
    }
    hash.encode_to_vec()
}
