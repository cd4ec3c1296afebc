use std::fs::{File, OpenOptions};

use crate::error::HandlerError;

/// Opens a macvtap character device `/dev/tap<ifindex>` in read-write
/// mode, once per guest queue. Not part of the `Handler` capability
/// list in `spec.md` §6 (that list is exhaustive and omits tap-queue
/// opening) — kubevirt's own source opens the device directly rather
/// than routing it through its netlink handler, so this is a free
/// function rather than a `Handler` method. Follows the corpus's own
/// precedent for opening a special device path and keeping the `File`
/// handle around (`libcni::ns::ns::Netns`'s `OpenOptions::new()...open(...)`
/// against `/proc/<pid>/task/<tid>/ns/net`) rather than reaching for
/// raw-fd plumbing.
pub fn open_tap_queue(ifindex: u32) -> Result<File, HandlerError> {
    let path = format!("/dev/tap{ifindex}");
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| HandlerError::Tap(format!("open {path}: {e}")))
}

/// Opens `queues` tap-queue file descriptors, closing everything opened
/// so far on first failure (`spec.md` §4.4 `prepare` step 2).
pub fn open_tap_queues(ifindex: u32, queues: usize) -> Result<Vec<File>, HandlerError> {
    let mut files = Vec::with_capacity(queues);
    for _ in 0..queues {
        match open_tap_queue(ifindex) {
            Ok(f) => files.push(f),
            Err(e) => {
                // Dropping `files` here closes every fd opened so far.
                return Err(e);
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_queues_opens_nothing() {
        let files = open_tap_queues(0, 0).unwrap();
        assert!(files.is_empty());
    }
}
