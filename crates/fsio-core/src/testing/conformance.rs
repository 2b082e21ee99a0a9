//! Behaviour every [`Filesystem`] is expected to share, packaged as a single
//! async function that backend test suites call against a prepared instance.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::StreamExt;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha512_256};
use tokio::io::AsyncReadExt;

use crate::context::Context;
use crate::filesystem::Filesystem;
use crate::location::Location;

/// Size of the payload used by the write round trip.
pub const WRITE_SIZE: usize = 8 * 1024 * 1024;

/// Run the shared checks against `fs`, which must already hold exactly
/// `expected_files` files. Panics on the first violated expectation.
pub async fn run<F: Filesystem + ?Sized>(fs: &F, expected_files: usize) {
    enumerate(fs, expected_files).await;
    write_round_trip(fs).await;
}

async fn enumerate<F: Filesystem + ?Sized>(fs: &F, expected_files: usize) {
    let ctx = Context::new().with_timeout(Duration::from_secs(60));
    let count = fs.files(&ctx).count().await;
    assert_eq!(count, expected_files, "enumeration should find every file");

    // Stopping early must neither hang nor poison later enumerations.
    let early: Vec<_> = fs.files(&ctx).take(10).collect().await;
    assert_eq!(early.len(), expected_files.min(10));
    let again = fs.files(&ctx).count().await;
    assert_eq!(again, expected_files, "enumeration must be restartable");

    let expired = Context::new().with_timeout(Duration::ZERO);
    let partial = fs.files(&expired).count().await;
    if expected_files > 0 {
        assert!(
            partial < expected_files,
            "expired context should cut enumeration short ({partial} of {expected_files})"
        );
    }
}

async fn write_round_trip<F: Filesystem + ?Sized>(fs: &F) {
    let ctx = Context::new().with_timeout(Duration::from_secs(60));
    let target = Location::new(["sub", "location", "temporary"]).unwrap();
    let mod_time = Utc.with_ymd_and_hms(2023, 6, 1, 8, 0, 0).unwrap();

    let mut payload = vec![0u8; WRITE_SIZE];
    StdRng::seed_from_u64(7).fill_bytes(&mut payload);
    let expected = hex::encode(Sha512_256::digest(&payload));

    let written = fs
        .write_file(&ctx, &target, &mut payload.as_slice(), mod_time)
        .await
        .expect("write should succeed");

    let mut reader = fs.open(&ctx, &written).await.expect("open after write");
    let mut read_back = Vec::with_capacity(WRITE_SIZE);
    reader.read_to_end(&mut read_back).await.expect("read back");
    drop(reader);
    assert_eq!(
        hex::encode(Sha512_256::digest(&read_back)),
        expected,
        "content must survive the round trip"
    );

    let before = fs.checksum_cheap(&ctx, &written).await.expect("cheap checksum");
    fs.write_file(&ctx, &target, &mut payload.as_slice(), mod_time)
        .await
        .expect("identical rewrite");
    let after = fs.checksum_cheap(&ctx, &written).await.expect("cheap checksum");
    assert_eq!(before, after, "identical rewrite must keep the cheap checksum");

    let timed_out = Location::new(["sub", "location", "temporary2"]).unwrap();
    let expired = Context::new().with_timeout(Duration::ZERO);
    let res = fs
        .write_file(&expired, &timed_out, &mut payload.as_slice(), mod_time)
        .await;
    assert!(res.is_err(), "write under an expired context must fail");
    let leftover = fs.open(&ctx, &timed_out).await;
    assert!(
        matches!(&leftover, Err(e) if e.is_not_found()),
        "a failed write must not leave a readable object"
    );

    fs.remove_all(&ctx, &written).await.expect("cleanup");
    fs.remove_all(&ctx, &timed_out).await.expect("cleanup of absent file");
}
