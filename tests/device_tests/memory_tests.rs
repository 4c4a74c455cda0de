//! Tests for the in-memory block device
//!
//! These tests verify:
//! - Append-only writes and erase semantics
//! - Bounds checking
//! - Shared handles, fault injection and corruption helpers

use flashkv::device::{BlockDevice, Fault, ERASED_BYTE};
use flashkv::{FlashError, MemDevice};

#[test]
fn test_new_device_is_erased() {
    let device = MemDevice::new(4, 256);
    assert_eq!(device.page_count(), 4);
    assert_eq!(device.page_size(), 256);

    for page in 0..4 {
        assert!(device.read_page(page).unwrap().iter().all(|&b| b == ERASED_BYTE));
        assert_eq!(device.write_mark(page), 0);
    }
}

#[test]
fn test_write_then_read() {
    let mut device = MemDevice::new(4, 256);
    device.write_page(1, 0, b"hello").unwrap();
    device.write_page(1, 5, b" world").unwrap();

    let mut buf = [0u8; 11];
    device.read(1, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"hello world");
    assert_eq!(device.write_mark(1), 11);

    // Other pages untouched
    assert!(device.read_page(2).unwrap().iter().all(|&b| b == ERASED_BYTE));
}

#[test]
fn test_writes_are_append_only() {
    let mut device = MemDevice::new(4, 256);
    device.write_page(1, 0, &[1; 64]).unwrap();

    let err = device.write_page(1, 32, &[2; 8]).unwrap_err();
    assert!(matches!(err, FlashError::Device { page: 1, .. }));

    // Gaps are allowed
    device.write_page(1, 128, &[3; 8]).unwrap();
    assert_eq!(device.write_mark(1), 136);
    assert!(device.write_page(1, 64, &[4; 8]).is_err());
}

#[test]
fn test_bounds_checked() {
    let mut device = MemDevice::new(4, 256);

    assert!(matches!(device.write_page(4, 0, &[0]), Err(FlashError::Device { page: 4, .. })));
    assert!(device.write_page(1, 250, &[0; 8]).is_err());
    assert!(device.erase_page(9).is_err());

    let mut buf = [0u8; 8];
    assert!(device.read(1, 252, &mut buf).is_err());
    assert!(device.read(7, 0, &mut buf).is_err());
}

#[test]
fn test_erase_resets_page() {
    let mut device = MemDevice::new(4, 256);
    device.write_page(2, 0, &[0; 256]).unwrap();
    device.erase_page(2).unwrap();

    assert!(device.read_page(2).unwrap().iter().all(|&b| b == ERASED_BYTE));
    assert_eq!(device.write_mark(2), 0);
    assert_eq!(device.erase_count(2), 1);

    // Writable again from the start
    device.write_page(2, 0, &[7; 4]).unwrap();
}

#[test]
fn test_clones_share_pages() {
    let mut device = MemDevice::new(4, 256);
    let other = device.clone();

    device.write_page(3, 0, b"shared").unwrap();
    let mut buf = [0u8; 6];
    other.read(3, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"shared");
}

#[test]
fn test_write_fault_is_one_shot() {
    let mut device = MemDevice::new(4, 256);
    device.fail_next(Fault::Write);

    assert!(device.write_page(1, 0, &[1; 8]).unwrap_err().is_io());
    assert_eq!(device.write_mark(1), 0);
    assert!(device.read_page(1).unwrap().iter().all(|&b| b == ERASED_BYTE));

    device.write_page(1, 0, &[1; 8]).unwrap();
}

#[test]
fn test_fault_on_nth_write() {
    let mut device = MemDevice::new(4, 256);
    device.fail_nth(Fault::Write, 3);

    device.write_page(1, 0, &[1; 8]).unwrap();
    device.write_page(1, 8, &[2; 8]).unwrap();
    assert!(device.write_page(1, 16, &[3; 8]).unwrap_err().is_io());
    assert_eq!(device.write_mark(1), 16);
    device.write_page(1, 16, &[3; 8]).unwrap();

    device.fail_nth(Fault::Write, 2);
    device.clear_faults();
    device.write_page(1, 24, &[4; 8]).unwrap();
    device.write_page(1, 32, &[5; 8]).unwrap();
    assert_eq!(device.write_mark(1), 40);
}

#[test]
fn test_read_and_erase_faults() {
    let mut device = MemDevice::new(4, 256);

    device.fail_next(Fault::Read);
    assert!(device.read_page(0).is_err());
    assert!(device.read_page(0).is_ok());

    device.fail_next(Fault::Erase);
    assert!(device.erase_page(1).is_err());
    assert_eq!(device.erase_count(1), 0);
    device.erase_page(1).unwrap();
    assert_eq!(device.erase_count(1), 1);
}

#[test]
fn test_corrupt_flips_bits() {
    let mut device = MemDevice::new(4, 256);
    device.write_page(1, 0, &[0x0F; 4]).unwrap();
    device.corrupt(1, 2, 0xFF);

    let mut buf = [0u8; 4];
    device.read(1, 0, &mut buf).unwrap();
    assert_eq!(buf, [0x0F, 0x0F, 0xF0, 0x0F]);
    assert_eq!(device.write_mark(1), 4);
}

#[test]
fn test_borrowed_device_forwards() {
    fn write_through<D: BlockDevice>(mut device: D) {
        device.write_page(1, 0, b"via ref").unwrap();
    }

    let mut device = MemDevice::new(4, 256);
    write_through(&mut device);

    let mut buf = [0u8; 7];
    device.read(1, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"via ref");
}
