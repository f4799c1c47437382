use crc32fast::Hasher;

pub struct Checksum {
    hash: Hasher,
}

impl Checksum {
    pub fn new() -> Checksum {
        Checksum {
            hash: Hasher::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hash.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.hash.finalize()
    }
}

// One-shot checksum of a single buffer
pub fn checksum(data: &[u8]) -> u32 {
    let mut hash = Checksum::new();
    hash.update(data);
    hash.finalize()
}
