/// A path through the trie, one 4-bit nibble per element.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Nibbles {
    data: Vec<u8>,
}

impl Nibbles {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let data = bytes.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect();
        Self { data }
    }

    pub fn from_raw(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn at(&self, index: usize) -> u8 {
        self.data[index]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Length of the prefix shared by `self` and `other`, starting at `from`.
    pub fn common_prefix_len(&self, other: &Nibbles, from: usize) -> usize {
        self.data[from..]
            .iter()
            .zip(other.data.get(from..).unwrap_or_default())
            .take_while(|(a, b)| a == b)
            .count()
    }
}

/// Compact (hex-prefix) encoding of a nibble path.
pub fn encode_compact(path: &[u8], is_leaf: bool) -> Vec<u8> {
    let flag = if is_leaf { 0x20 } else { 0x00 };
    let mut compact = Vec::with_capacity(path.len() / 2 + 1);
    let rest = if path.len() % 2 == 1 {
        compact.push(flag | 0x10 | path[0]);
        &path[1..]
    } else {
        compact.push(flag);
        path
    };
    compact.extend(rest.chunks(2).map(|pair| (pair[0] << 4) | pair[1]));
    compact
}
