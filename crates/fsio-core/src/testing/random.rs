use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tokio::io::AsyncRead;

use crate::checksum::{cheap_checksum, content_checksum};
use crate::context::Context;
use crate::error::FsError;
use crate::filesystem::{entry_stream, EntryStream, FileReader, Filesystem, ENTRY_QUEUE_CAPACITY};
use crate::io::copy_with_context;
use crate::location::{Entry, Location};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SEED: u64 = 0x494e_5345_4355_5245;

/// In-memory source of deterministic pseudo-random files.
///
/// Every open of the same location yields the same bytes. Writes only record
/// the location and discard the data.
#[derive(Debug)]
pub struct RandomFs {
    locations: RwLock<HashSet<Location>>,
    file_size: usize,
    mod_time: DateTime<Utc>,
}

impl RandomFs {
    pub fn new(locations: impl IntoIterator<Item = Location>, file_size: usize) -> Self {
        Self {
            locations: RwLock::new(locations.into_iter().collect()),
            file_size,
            mod_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default(),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes served for `location`.
    pub fn content(&self, location: &Location) -> Vec<u8> {
        let mut hasher = DefaultHasher::new();
        location.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());
        let mut data = vec![0u8; self.file_size];
        rng.fill_bytes(&mut data);
        data
    }

    fn snapshot(&self) -> Vec<Location> {
        self.locations
            .read()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn contains(&self, location: &Location) -> bool {
        self.locations
            .read()
            .map(|set| set.contains(location))
            .unwrap_or(false)
    }

    fn require(&self, location: &Location) -> Result<(), FsError> {
        if self.contains(location) {
            Ok(())
        } else {
            Err(FsError::NotFound(location.to_string()))
        }
    }
}

#[async_trait]
impl Filesystem for RandomFs {
    async fn checksum_cheap(&self, _ctx: &Context, location: &Location) -> Result<String, FsError> {
        self.require(location)?;
        Ok(cheap_checksum(self.mod_time, self.file_size as u64))
    }

    async fn checksum_content(&self, ctx: &Context, location: &Location) -> Result<String, FsError> {
        self.require(location)?;
        let data = self.content(location);
        content_checksum(ctx, &mut data.as_slice(), None).await
    }

    fn files(&self, ctx: &Context) -> EntryStream {
        let (tx, rx) = tokio::sync::mpsc::channel(ENTRY_QUEUE_CAPACITY);
        let locations = self.snapshot();
        let mod_time = self.mod_time;
        let producer_ctx = ctx.clone();
        tokio::spawn(async move {
            for location in locations {
                if producer_ctx.is_done() {
                    return;
                }
                if tx.send(Entry::new(location, mod_time)).await.is_err() {
                    return;
                }
            }
        });
        entry_stream(ctx, rx)
    }

    async fn open(&self, ctx: &Context, location: &Location) -> Result<FileReader, FsError> {
        ctx.check()?;
        self.require(location)?;
        Ok(Box::new(std::io::Cursor::new(self.content(location))))
    }

    async fn write_file(
        &self,
        ctx: &Context,
        location: &Location,
        src: &mut (dyn AsyncRead + Send + Unpin),
        _mod_time: DateTime<Utc>,
    ) -> Result<Location, FsError> {
        copy_with_context(ctx, src, &mut tokio::io::sink()).await?;
        if let Ok(mut set) = self.locations.write() {
            set.insert(location.clone());
        }
        Ok(location.clone())
    }

    async fn remove_all(&self, _ctx: &Context, location: &Location) -> Result<(), FsError> {
        if let Ok(mut set) = self.locations.write() {
            set.remove(location);
        }
        Ok(())
    }

    async fn move_file(
        &self,
        _ctx: &Context,
        old: &Location,
        new: &Location,
    ) -> Result<Location, FsError> {
        let mut set = self
            .locations
            .write()
            .map_err(|_| FsError::Io("location set poisoned".to_string()))?;
        if !set.remove(old) {
            return Err(FsError::NotFound(old.to_string()));
        }
        set.insert(new.clone());
        Ok(new.clone())
    }
}

/// `n` distinct random locations of one to five segments each.
///
/// No location is a strict prefix of another, so the set can be materialised
/// on a real directory tree.
pub fn generate_locations(n: usize) -> Vec<Location> {
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut files: HashSet<Vec<String>> = HashSet::with_capacity(n);
    let mut dirs: HashSet<Vec<String>> = HashSet::new();
    let mut out = Vec::with_capacity(n);

    while out.len() < n {
        let parts = rng.gen_range(1..=5);
        let segments: Vec<String> = (0..parts).map(|_| random_segment(&mut rng, 5)).collect();

        let clashes_with_dir = dirs.contains(&segments) || files.contains(&segments);
        let clashes_with_file = (1..segments.len()).any(|i| files.contains(&segments[..i].to_vec()));
        if clashes_with_dir || clashes_with_file {
            continue;
        }

        for i in 1..segments.len() {
            dirs.insert(segments[..i].to_vec());
        }
        files.insert(segments.clone());
        if let Ok(location) = Location::new(segments) {
            out.push(location);
        }
    }
    out
}

fn random_segment(rng: &mut StdRng, len: usize) -> String {
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_generate_locations_are_distinct_and_prefix_free() {
        let locations = generate_locations(500);
        assert_eq!(locations.len(), 500);
        let keys: HashSet<_> = locations.iter().map(|l| l.segments().to_vec()).collect();
        assert_eq!(keys.len(), 500);
        for location in &locations {
            assert!((1..=5).contains(&location.len()));
            for i in 1..location.len() {
                assert!(!keys.contains(&location.segments()[..i].to_vec()));
            }
        }
    }

    #[tokio::test]
    async fn test_open_is_deterministic() {
        let locations = generate_locations(3);
        let fs = RandomFs::new(locations.clone(), 4096);
        let ctx = Context::new();

        let mut first = Vec::new();
        fs.open(&ctx, &locations[0]).await.unwrap().read_to_end(&mut first).await.unwrap();
        let mut second = Vec::new();
        fs.open(&ctx, &locations[0]).await.unwrap().read_to_end(&mut second).await.unwrap();
        assert_eq!(first.len(), 4096);
        assert_eq!(first, second);
        assert_ne!(first, fs.content(&locations[1]));
    }

    #[tokio::test]
    async fn test_files_lists_everything() {
        let fs = RandomFs::new(generate_locations(50), 16);
        let entries: Vec<_> = fs.files(&Context::new()).collect().await;
        assert_eq!(entries.len(), 50);
    }

    #[tokio::test]
    async fn test_missing_location() {
        let fs = RandomFs::new(Vec::new(), 16);
        let missing = Location::parse("nope").unwrap();
        let err = fs.open(&Context::new(), &missing).await.err().unwrap();
        assert!(err.is_not_found());
    }
}
