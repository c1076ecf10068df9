//! Platform affinity collaborator
//!
//! CPU affinity get/set for worker threads. Linux uses
//! `pthread_{get,set}affinity_np` on the thread's native handle; other
//! platforms report [`PlatformError::Unsupported`]. Failures surface to the
//! caller of the affinity operation and affect nothing else.

use crate::PlatformError;
use std::thread::JoinHandle;

/// Bitmask over logical CPUs
///
/// Index `i` corresponds to logical CPU `i`; a set bit means the thread is
/// permitted to run there.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpuSet {
    bits: Vec<bool>,
}

impl CpuSet {
    /// Create a mask of `len` CPUs, all cleared
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![false; len],
        }
    }

    /// Create a mask permitting only the given CPU
    pub fn single(cpu: usize) -> Self {
        let mut mask = Self::new(cpu + 1);
        mask.set(cpu, true);
        mask
    }

    /// Set or clear one CPU, growing the mask if needed
    pub fn set(&mut self, cpu: usize, allowed: bool) {
        if cpu >= self.bits.len() {
            self.bits.resize(cpu + 1, false);
        }
        self.bits[cpu] = allowed;
    }

    /// Whether the given CPU is permitted
    pub fn is_set(&self, cpu: usize) -> bool {
        self.bits.get(cpu).copied().unwrap_or(false)
    }

    /// Number of CPUs the mask covers
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Whether the mask covers no CPUs at all
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Number of permitted CPUs
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// Iterate over the permitted CPU indices
    pub fn cpus(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.then_some(i))
    }
}

impl From<Vec<bool>> for CpuSet {
    fn from(bits: Vec<bool>) -> Self {
        Self { bits }
    }
}

/// Get the affinity mask of the thread behind `handle`
#[cfg(target_os = "linux")]
pub fn get_thread_affinity(handle: &JoinHandle<()>) -> Result<CpuSet, PlatformError> {
    use std::os::unix::thread::JoinHandleExt;

    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        libc::pthread_getaffinity_np(
            handle.as_pthread_t(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &mut set,
        )
    };
    if rc != 0 {
        return Err(PlatformError::Affinity(std::io::Error::from_raw_os_error(
            rc,
        )));
    }

    let cpus = num_cpus::get().max(1);
    let mut mask = CpuSet::new(cpus);
    for cpu in 0..cpus {
        if unsafe { libc::CPU_ISSET(cpu, &set) } {
            mask.set(cpu, true);
        }
    }
    Ok(mask)
}

/// Set the affinity mask of the thread behind `handle`
///
/// The mask is validated before the syscall: it must permit at least one CPU,
/// and no permitted index may exceed what `cpu_set_t` can represent.
#[cfg(target_os = "linux")]
pub fn set_thread_affinity(handle: &JoinHandle<()>, mask: &CpuSet) -> Result<(), PlatformError> {
    use std::os::unix::thread::JoinHandleExt;

    if mask.count() == 0 {
        return Err(PlatformError::EmptyMask);
    }

    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    unsafe { libc::CPU_ZERO(&mut set) };
    for cpu in mask.cpus() {
        if cpu >= libc::CPU_SETSIZE as usize {
            return Err(PlatformError::InvalidCpu(cpu));
        }
        unsafe { libc::CPU_SET(cpu, &mut set) };
    }

    let rc = unsafe {
        libc::pthread_setaffinity_np(
            handle.as_pthread_t(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        )
    };
    if rc != 0 {
        return Err(PlatformError::Affinity(std::io::Error::from_raw_os_error(
            rc,
        )));
    }
    Ok(())
}

/// Get the affinity mask of the thread behind `handle`
#[cfg(not(target_os = "linux"))]
pub fn get_thread_affinity(handle: &JoinHandle<()>) -> Result<CpuSet, PlatformError> {
    let _ = handle;
    Err(PlatformError::Unsupported)
}

/// Set the affinity mask of the thread behind `handle`
#[cfg(not(target_os = "linux"))]
pub fn set_thread_affinity(handle: &JoinHandle<()>, mask: &CpuSet) -> Result<(), PlatformError> {
    let _ = (handle, mask);
    Err(PlatformError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_set_basics() {
        let mut mask = CpuSet::new(4);
        assert_eq!(mask.len(), 4);
        assert_eq!(mask.count(), 0);

        mask.set(1, true);
        mask.set(3, true);
        assert!(mask.is_set(1));
        assert!(!mask.is_set(2));
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.cpus().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_cpu_set_grows_on_set() {
        let mut mask = CpuSet::new(1);
        mask.set(7, true);
        assert_eq!(mask.len(), 8);
        assert!(mask.is_set(7));
        // Out-of-range queries are simply "not permitted"
        assert!(!mask.is_set(100));
    }

    #[test]
    fn test_cpu_set_single_and_from_vec() {
        let mask = CpuSet::single(2);
        assert_eq!(mask.cpus().collect::<Vec<_>>(), vec![2]);

        let mask = CpuSet::from(vec![true, false, true]);
        assert_eq!(mask.cpus().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[cfg(target_os = "linux")]
    mod linux {
        use super::*;
        use std::thread;
        use std::time::Duration;

        fn parked_thread() -> (std::sync::mpsc::Sender<()>, thread::JoinHandle<()>) {
            let (tx, rx) = std::sync::mpsc::channel();
            let handle = thread::spawn(move || {
                let _ = rx.recv_timeout(Duration::from_secs(5));
            });
            (tx, handle)
        }

        #[test]
        fn test_get_affinity_reports_at_least_one_cpu() {
            let (tx, handle) = parked_thread();
            let mask = get_thread_affinity(&handle).unwrap();
            assert!(mask.count() >= 1);
            tx.send(()).unwrap();
            handle.join().unwrap();
        }

        #[test]
        fn test_set_then_get_round_trip() {
            let (tx, handle) = parked_thread();
            let allowed = get_thread_affinity(&handle).unwrap();
            let first = allowed.cpus().next().unwrap();

            set_thread_affinity(&handle, &CpuSet::single(first)).unwrap();
            let mask = get_thread_affinity(&handle).unwrap();
            assert_eq!(mask.cpus().collect::<Vec<_>>(), vec![first]);

            tx.send(()).unwrap();
            handle.join().unwrap();
        }

        #[test]
        fn test_empty_mask_rejected() {
            let (tx, handle) = parked_thread();
            let err = set_thread_affinity(&handle, &CpuSet::new(4)).unwrap_err();
            assert!(matches!(err, crate::PlatformError::EmptyMask));
            tx.send(()).unwrap();
            handle.join().unwrap();
        }

        #[test]
        fn test_out_of_range_cpu_rejected() {
            let (tx, handle) = parked_thread();
            let err = set_thread_affinity(&handle, &CpuSet::single(1 << 20)).unwrap_err();
            assert!(matches!(err, crate::PlatformError::InvalidCpu(_)));
            tx.send(()).unwrap();
            handle.join().unwrap();
        }
    }
}
