use std::hash::{BuildHasher, Hasher};

/// A hasher for `ThreadId` values.
///
/// Thread ids are already unique integers, so the cheapest possible hash is to pass the
/// value through. `ThreadId` feeds its inner counter to the hasher as a single `u64`
/// write; the byte-slice fallback exists only to remain correct if that ever changes.
#[derive(Debug, Default)]
pub(crate) struct ThreadIdHasher {
    value: u64,
}

impl Hasher for ThreadIdHasher {
    fn finish(&self) -> u64 {
        self.value
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.value = self.value.rotate_left(8) ^ u64::from(*byte);
        }
    }

    fn write_u64(&mut self, i: u64) {
        self.value = i;
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct BuildThreadIdHasher;

impl BuildHasher for BuildThreadIdHasher {
    type Hasher = ThreadIdHasher;

    fn build_hasher(&self) -> Self::Hasher {
        ThreadIdHasher::default()
    }
}
