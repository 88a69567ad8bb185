//! Read-only access to the simulator's shared telemetry segment.
//!
//! Opening a segment that does not exist is the normal state while the
//! simulator is not running, so openers report it as `Ok(None)` rather than
//! an error. Nothing here ever writes to a segment.

use std::{
    fs::File,
    io,
    path::PathBuf,
    sync::{Arc, RwLock},
};

use memmap2::Mmap;

use crate::PitlightError;

/// A mapped segment. Reads copy out of the mapping so decoding works on
/// owned bytes while the simulator keeps writing.
pub trait SharedSegment: Send {
    fn len(&self) -> usize;

    fn read_into(&self, offset: usize, buf: &mut [u8]) -> Result<(), PitlightError>;

    /// Lengths come from the header, so they are checked against the
    /// segment before anything is allocated.
    fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, PitlightError> {
        check_bounds(offset, len, self.len())?;
        let mut buf = vec![0u8; len];
        self.read_into(offset, &mut buf)?;
        Ok(buf)
    }
}

pub trait SegmentOpener: Send {
    /// Human readable location for logs.
    fn describe(&self) -> String;

    /// `Ok(None)` when the segment is not published.
    fn open(&self) -> Result<Option<Box<dyn SharedSegment>>, PitlightError>;
}

fn check_bounds(offset: usize, len: usize, size: usize) -> Result<(), PitlightError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(PitlightError::SegmentBoundsError { offset, len, size }),
    }
}

/// Segment backed by a memory-mapped file, e.g. a bridge mirroring the
/// simulator's mapping under `/dev/shm`.
#[derive(Debug, Clone)]
pub struct MappedFileOpener {
    path: PathBuf,
}

impl MappedFileOpener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

struct MappedFileSegment {
    mmap: Mmap,
}

impl SharedSegment for MappedFileSegment {
    fn len(&self) -> usize {
        self.mmap.len()
    }

    fn read_into(&self, offset: usize, buf: &mut [u8]) -> Result<(), PitlightError> {
        check_bounds(offset, buf.len(), self.mmap.len())?;
        buf.copy_from_slice(&self.mmap[offset..offset + buf.len()]);
        Ok(())
    }
}

impl SegmentOpener for MappedFileOpener {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> Result<Option<Box<dyn SharedSegment>>, PitlightError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PitlightError::SegmentMapError { source: e }),
        };
        // SAFETY: the mapping is read-only and every read is bounds checked
        // against the length captured at map time.
        let mmap =
            unsafe { Mmap::map(&file) }.map_err(|e| PitlightError::SegmentMapError { source: e })?;
        Ok(Some(Box::new(MappedFileSegment { mmap })))
    }
}

/// In-process segment. The [`MemorySegmentHandle`] plays the simulator:
/// it publishes images, replaces them between ticks and withdraws them.
#[derive(Debug, Clone, Default)]
pub struct MemorySegmentOpener {
    image: Arc<RwLock<Option<Vec<u8>>>>,
}

#[derive(Debug, Clone)]
pub struct MemorySegmentHandle {
    image: Arc<RwLock<Option<Vec<u8>>>>,
}

impl MemorySegmentHandle {
    pub fn publish(&self, image: Vec<u8>) {
        if let Ok(mut slot) = self.image.write() {
            *slot = Some(image);
        }
    }

    pub fn withdraw(&self) {
        if let Ok(mut slot) = self.image.write() {
            *slot = None;
        }
    }
}

impl MemorySegmentOpener {
    pub fn new() -> (Self, MemorySegmentHandle) {
        let opener = Self::default();
        let handle = MemorySegmentHandle {
            image: opener.image.clone(),
        };
        (opener, handle)
    }
}

struct MemorySegment {
    image: Arc<RwLock<Option<Vec<u8>>>>,
}

impl SharedSegment for MemorySegment {
    fn len(&self) -> usize {
        self.image
            .read()
            .ok()
            .and_then(|image| image.as_ref().map(Vec::len))
            .unwrap_or_default()
    }

    fn read_into(&self, offset: usize, buf: &mut [u8]) -> Result<(), PitlightError> {
        let guard = self
            .image
            .read()
            .map_err(|_| PitlightError::TelemetryProducerError {
                description: "memory segment lock poisoned".to_string(),
            })?;
        let image = guard
            .as_ref()
            .ok_or(PitlightError::TelemetryProducerError {
                description: "memory segment withdrawn".to_string(),
            })?;
        check_bounds(offset, buf.len(), image.len())?;
        buf.copy_from_slice(&image[offset..offset + buf.len()]);
        Ok(())
    }
}

impl SegmentOpener for MemorySegmentOpener {
    fn describe(&self) -> String {
        "in-memory segment".to_string()
    }

    fn open(&self) -> Result<Option<Box<dyn SharedSegment>>, PitlightError> {
        let published = self
            .image
            .read()
            .map(|image| image.is_some())
            .unwrap_or(false);
        if !published {
            return Ok(None);
        }
        Ok(Some(Box::new(MemorySegment {
            image: self.image.clone(),
        })))
    }
}

/// Name of the file mapping the simulator publishes on Windows.
pub const DEFAULT_SEGMENT_NAME: &str = "Local\\IRSDKMemMapFileName";

#[cfg(windows)]
pub use windows_segment::NamedSegmentOpener;

#[cfg(windows)]
mod windows_segment {
    use std::{ffi::OsStr, mem, os::windows::ffi::OsStrExt, ptr};

    use winapi::{
        shared::winerror::ERROR_FILE_NOT_FOUND,
        um::{
            errhandlingapi::GetLastError,
            handleapi::CloseHandle,
            memoryapi::{FILE_MAP_READ, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, VirtualQuery},
            winnt::{HANDLE, MEMORY_BASIC_INFORMATION},
        },
    };

    use super::{DEFAULT_SEGMENT_NAME, SegmentOpener, SharedSegment, check_bounds};
    use crate::PitlightError;

    /// Named file mapping published by the simulator.
    #[derive(Debug, Clone)]
    pub struct NamedSegmentOpener {
        name: String,
    }

    impl Default for NamedSegmentOpener {
        fn default() -> Self {
            Self::new(DEFAULT_SEGMENT_NAME)
        }
    }

    impl NamedSegmentOpener {
        pub fn new(name: impl Into<String>) -> Self {
            Self { name: name.into() }
        }
    }

    struct NamedSegment {
        handle: HANDLE,
        base: *const u8,
        len: usize,
    }

    // The view is only read through bounds-checked copies.
    unsafe impl Send for NamedSegment {}

    impl Drop for NamedSegment {
        fn drop(&mut self) {
            // SAFETY: both were obtained in `open` and are released once.
            unsafe {
                UnmapViewOfFile(self.base as *const _);
                CloseHandle(self.handle);
            }
        }
    }

    impl SharedSegment for NamedSegment {
        fn len(&self) -> usize {
            self.len
        }

        fn read_into(&self, offset: usize, buf: &mut [u8]) -> Result<(), PitlightError> {
            check_bounds(offset, buf.len(), self.len)?;
            // SAFETY: the range was checked against the committed view size.
            unsafe {
                ptr::copy_nonoverlapping(self.base.add(offset), buf.as_mut_ptr(), buf.len());
            }
            Ok(())
        }
    }

    impl SegmentOpener for NamedSegmentOpener {
        fn describe(&self) -> String {
            self.name.clone()
        }

        fn open(&self) -> Result<Option<Box<dyn SharedSegment>>, PitlightError> {
            let wide: Vec<u16> = OsStr::new(&self.name)
                .encode_wide()
                .chain(Some(0))
                .collect();

            // SAFETY: Win32 calls with a valid, null-terminated UTF-16 name.
            unsafe {
                let handle = OpenFileMappingW(FILE_MAP_READ, 0, wide.as_ptr());
                if handle.is_null() {
                    let code = GetLastError();
                    if code == ERROR_FILE_NOT_FOUND {
                        return Ok(None);
                    }
                    return Err(PitlightError::SegmentOpenError {
                        name: self.name.clone(),
                        code,
                    });
                }

                let base = MapViewOfFile(handle, FILE_MAP_READ, 0, 0, 0) as *const u8;
                if base.is_null() {
                    let code = GetLastError();
                    CloseHandle(handle);
                    return Err(PitlightError::SegmentOpenError {
                        name: self.name.clone(),
                        code,
                    });
                }

                let mut info: MEMORY_BASIC_INFORMATION = mem::zeroed();
                let queried = VirtualQuery(
                    base as *const _,
                    &mut info,
                    mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                );
                let len = if queried == 0 { 0 } else { info.RegionSize };

                Ok(Some(Box::new(NamedSegment { handle, base, len })))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let opener = MappedFileOpener::new(dir.path().join("IRSDKMemMapFileName"));
        assert!(opener.open().unwrap().is_none());
    }

    #[test]
    fn test_mapped_file_reads_are_bounds_checked() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        file.flush().unwrap();

        let segment = MappedFileOpener::new(file.path()).open().unwrap().unwrap();
        assert_eq!(segment.len(), 8);
        assert_eq!(segment.read(2, 3).unwrap(), vec![3, 4, 5]);
        assert!(matches!(
            segment.read(6, 4),
            Err(PitlightError::SegmentBoundsError {
                offset: 6,
                len: 4,
                size: 8
            })
        ));
        assert!(segment.read(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_memory_segment_follows_its_handle() {
        let (opener, handle) = MemorySegmentOpener::new();
        assert!(opener.open().unwrap().is_none());

        handle.publish(vec![9, 8, 7]);
        let segment = opener.open().unwrap().unwrap();
        assert_eq!(segment.read(0, 3).unwrap(), vec![9, 8, 7]);

        handle.publish(vec![1, 1, 1, 1]);
        assert_eq!(segment.len(), 4);

        handle.withdraw();
        assert!(segment.read(0, 1).is_err());
        assert!(opener.open().unwrap().is_none());
    }

    #[test]
    fn test_oversized_read_fails_without_allocating() {
        let (opener, handle) = MemorySegmentOpener::new();
        handle.publish(vec![0; 16]);
        let segment = opener.open().unwrap().unwrap();

        // a corrupt header can ask for any length
        assert!(matches!(
            segment.read(0, isize::MAX as usize),
            Err(PitlightError::SegmentBoundsError { offset: 0, size: 16, .. })
        ));
        assert!(matches!(
            segment.read(8, usize::MAX),
            Err(PitlightError::SegmentBoundsError { offset: 8, .. })
        ));
    }
}
