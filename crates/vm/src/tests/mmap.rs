//! 文件映射

use alloc::sync::Arc;
use alloc::vec;

use test_support::mock::fs::MockFile;

use super::harness::{Harness, MAP_BASE, MAX_STACK, STACK_TOP, patterned_file};
use crate::{BackingKind, MapId, PAGE_SIZE, Vaddr, VmError, VmFile, Vpn};

#[test]
fn test_unmap_writes_back_dirty_byte() {
    let h = Harness::new(4);
    let space = h.new_space();
    let data: vec::Vec<u8> = (1..=512).map(|i| i as u8).collect();
    let mock = MockFile::new(data.clone());
    let file: Arc<dyn VmFile> = Arc::new(mock.reopen());

    let id = space.mmap(&file, Vaddr::from_usize(MAP_BASE)).unwrap();
    h.write_user(&space, MAP_BASE, &[0xFF]).unwrap();
    space.munmap(id).unwrap();

    let contents = mock.contents();
    assert_eq!(contents.len(), 512);
    assert_eq!(contents[0], 0xFF);
    assert_eq!(&contents[1..512], &data[1..512]);
    assert_eq!(h.system.frames().resident_count(), 0);
    space.with_table(|table| assert!(table.is_empty()));
    space.destroy().unwrap();
    h.system.shutdown();
}

#[test]
fn test_mmap_creates_one_entry_per_page() {
    let h = Harness::new(4);
    let space = h.new_space();
    let (_mock, file) = patterned_file(2 * PAGE_SIZE + 100, 2);
    let id = space.mmap(&file, Vaddr::from_usize(MAP_BASE)).unwrap();
    assert_eq!(id, MapId(1));
    assert_eq!(
        space.mapping(id),
        Some((Vaddr::from_usize(MAP_BASE), 2 * PAGE_SIZE + 100))
    );

    space.with_table(|table| {
        let layout: vec::Vec<_> = table
            .iter()
            .map(|e| (e.vpn(), e.kind(), e.offset(), e.length()))
            .collect();
        let first = MAP_BASE / PAGE_SIZE;
        assert_eq!(
            layout,
            vec![
                (Vpn::from_usize(first), BackingKind::MappedFile, 0, PAGE_SIZE),
                (Vpn::from_usize(first + 1), BackingKind::MappedFile, PAGE_SIZE, PAGE_SIZE),
                (Vpn::from_usize(first + 2), BackingKind::MappedFile, 2 * PAGE_SIZE, 100),
            ]
        );
    });
    // 建立映射不读取文件
    assert_eq!(h.system.frames().resident_count(), 0);
    space.destroy().unwrap();
}

#[test]
fn test_overlapping_map_is_rejected_without_mutation() {
    let h = Harness::new(4);
    let space = h.new_space();
    let (_a, first) = patterned_file(PAGE_SIZE, 1);
    let (second_mock, second) = patterned_file(3 * PAGE_SIZE, 2);
    space
        .mmap(&first, Vaddr::from_usize(MAP_BASE + 2 * PAGE_SIZE))
        .unwrap();

    let handles = second_mock.open_handles();
    assert_eq!(
        space.mmap(&second, Vaddr::from_usize(MAP_BASE)),
        Err(VmError::Overlap)
    );
    space.with_table(|table| assert_eq!(table.len(), 1));
    assert_eq!(space.mapping_ids().len(), 1);
    assert_eq!(second_mock.open_handles(), handles);

    // 紧挨着已有映射的范围可以建立
    assert!(space.mmap(&second, Vaddr::from_usize(MAP_BASE + 3 * PAGE_SIZE)).is_ok());
    space.destroy().unwrap();
}

#[test]
fn test_invalid_map_requests() {
    let h = Harness::new(4);
    let space = h.new_space();
    let (_mock, file) = patterned_file(PAGE_SIZE, 1);
    let empty: Arc<dyn VmFile> = Arc::new(MockFile::new(vec![]));

    assert_eq!(space.mmap(&file, Vaddr::from_usize(0)), Err(VmError::InvalidAddress));
    assert_eq!(
        space.mmap(&file, Vaddr::from_usize(MAP_BASE + 12)),
        Err(VmError::Unaligned)
    );
    assert_eq!(
        space.mmap(&empty, Vaddr::from_usize(MAP_BASE)),
        Err(VmError::EmptyFile)
    );
    assert_eq!(
        space.mmap(&file, Vaddr::from_usize(STACK_TOP - MAX_STACK)),
        Err(VmError::Overlap)
    );
    let (_big, big) = patterned_file(2 * PAGE_SIZE, 0);
    assert_eq!(
        space.mmap(&big, Vaddr::from_usize(STACK_TOP - MAX_STACK - PAGE_SIZE)),
        Err(VmError::Overlap)
    );
    assert!(space.mapping_ids().is_empty());
    space.with_table(|table| assert!(table.is_empty()));
}

#[test]
fn test_munmap_unknown_id() {
    let h = Harness::new(1);
    let space = h.new_space();
    assert_eq!(space.munmap(MapId(42)), Err(VmError::NotFound));
}

#[test]
fn test_mapping_survives_closing_caller_handle() {
    let h = Harness::new(2);
    let space = h.new_space();
    let (mock, file) = patterned_file(PAGE_SIZE, 6);
    let id = space.mmap(&file, Vaddr::from_usize(MAP_BASE)).unwrap();
    assert_eq!(mock.open_handles(), 3);
    drop(file);

    let data = h.read_user(&space, MAP_BASE, 16).unwrap();
    assert_eq!(&data[..], &mock.contents()[..16]);
    space.munmap(id).unwrap();
    assert_eq!(mock.open_handles(), 1);
}

#[test]
fn test_unmap_releases_swapped_page_without_writing() {
    let h = Harness::new(1);
    let space = h.new_space();
    let (mock, file) = patterned_file(PAGE_SIZE, 5);
    let id = space.mmap(&file, Vaddr::from_usize(MAP_BASE)).unwrap();
    let (_other, other) = patterned_file(PAGE_SIZE, 0);
    space
        .mmap(&other, Vaddr::from_usize(MAP_BASE + 4 * PAGE_SIZE))
        .unwrap();

    // 只被读过的映射页是干净的，驱逐时进入交换区
    h.read_user(&space, MAP_BASE, 1).unwrap();
    h.read_user(&space, MAP_BASE + 4 * PAGE_SIZE, 1).unwrap();
    space.with_table(|table| {
        let entry = table.lookup(Vaddr::from_usize(MAP_BASE).floor()).unwrap();
        assert_eq!(entry.kind(), BackingKind::Swap);
    });
    assert_eq!(h.system.swap().used_slots(), 1);

    // 换出之后文件被外部修改，撤销映射不能覆盖它
    let mut changed = mock.contents();
    changed[0] = !changed[0];
    assert_eq!(mock.write_at(0, &changed[..1]), 1);
    let writes = mock.write_count();
    space.munmap(id).unwrap();
    assert_eq!(mock.contents(), changed);
    assert_eq!(mock.write_count(), writes);
    assert_eq!(h.system.swap().used_slots(), 0);
    h.check_invariants(&[&space]);
    space.destroy().unwrap();
    h.system.shutdown();
}

#[test]
fn test_destroy_unmaps_everything_and_closes_handles() {
    let h = Harness::new(2);
    let space = h.new_space();
    let (mock, file) = patterned_file(3 * PAGE_SIZE, 3);
    space.mmap(&file, Vaddr::from_usize(MAP_BASE)).unwrap();
    for i in 0..3 {
        h.write_user(&space, MAP_BASE + i * PAGE_SIZE + 7, &[0xC0 + i as u8])
            .unwrap();
    }
    assert!(h.system.swap().used_slots() == 0);
    assert_eq!(mock.open_handles(), 3);

    space.destroy().unwrap();
    let contents = mock.contents();
    for i in 0..3 {
        assert_eq!(contents[i * PAGE_SIZE + 7], 0xC0 + i as u8);
    }
    assert_eq!(mock.open_handles(), 2);
    assert!(space.mapping_ids().is_empty());
    space.with_table(|table| assert!(table.is_empty()));
    assert_eq!(h.mmu.mapping_count(), 0);
    assert_eq!(h.phys.allocated(), 0);

    // 重复销毁没有效果
    space.destroy().unwrap();
    h.system.shutdown();
}
