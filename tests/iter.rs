use cowbuf::{Buffer, ErrorKind};

#[test]
fn iterator_outlives_originating_buffer() {
    let buf = Buffer::try_from_slice(b"live").unwrap();
    let cursor = buf.begin().unwrap();
    drop(buf);
    assert_eq!(cursor.value().unwrap(), b'l');
    let collected: Vec<u8> = cursor.collect();
    assert_eq!(collected, b"live");
}

#[test]
fn iterator_holds_a_share() {
    let buf = Buffer::try_from_slice(b"counted").unwrap();
    assert_eq!(buf.share_count(), 1);
    let cursor = buf.begin().unwrap();
    assert_eq!(buf.share_count(), 2);
    drop(cursor);
    assert_eq!(buf.share_count(), 1);
}

#[test]
fn value_checks_bounds() {
    let buf = Buffer::try_from_slice(&[7, 8]).unwrap();
    let begin = buf.begin().unwrap();
    assert_eq!(begin.value().unwrap(), 7);

    let end = buf.end().unwrap();
    assert_eq!(end.index(), 2);
    assert_eq!(end.value().unwrap_err().kind(), ErrorKind::InvalidIterator);
}

#[test]
fn step_validates_both_bounds() {
    let buf = Buffer::try_from_slice(&[1, 2, 3]).unwrap();
    let begin = buf.begin().unwrap();

    let stepped = begin.try_step(2).unwrap();
    assert_eq!(stepped.index(), 2);
    assert_eq!(stepped.value().unwrap(), 3);

    // Stepping onto the end sentinel is allowed; past it is not.
    assert!(begin.try_step(3).is_ok());
    let err = begin.try_step(4).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidIterator);
    assert!(err.frames()[0].detail().contains("end"));

    let err = begin.try_step(-1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidIterator);
    assert!(err.frames()[0].detail().contains("begin"));
}

#[test]
fn seek_moves_in_place() {
    let buf = Buffer::try_from_slice(&[1, 2, 3, 4]).unwrap();
    let mut cursor = buf.begin().unwrap();
    cursor.try_seek(3).unwrap();
    assert_eq!(cursor.index(), 3);
    cursor.try_seek(-2).unwrap();
    assert_eq!(cursor.index(), 1);
    assert_eq!(cursor.value().unwrap(), 2);
}

#[test]
fn advance_and_retreat_guard_sentinels() {
    let buf = Buffer::try_from_slice(&[5]).unwrap();
    let mut cursor = buf.begin().unwrap();

    let err = cursor.try_retreat().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidIterator);
    assert!(err.frames()[0].detail().contains("begin"));

    let previous = cursor.try_advance().unwrap();
    assert_eq!(previous.index(), 0);
    assert_eq!(cursor.index(), 1);

    let err = cursor.try_advance().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidIterator);
    assert!(err.frames()[0].detail().contains("end"));

    let previous = cursor.try_retreat().unwrap();
    assert_eq!(previous.index(), 1);
    assert_eq!(cursor.index(), 0);
}

#[test]
fn distance_requires_identical_cell() {
    let buf = Buffer::try_from_slice(&[1, 2, 3, 4]).unwrap();
    let begin = buf.begin().unwrap();
    let end = buf.end().unwrap();
    assert_eq!(end.try_distance(&begin).unwrap(), 4);
    assert_eq!(begin.try_distance(&end).unwrap(), -4);

    let foreign = Buffer::try_from_slice(&[1, 2, 3, 4]).unwrap();
    let err = begin.try_distance(&foreign.begin().unwrap()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidIterator);
}

#[test]
fn equality_is_cell_identity_plus_index() {
    let buf = Buffer::try_from_slice(&[1, 2]).unwrap();
    assert_eq!(buf.begin().unwrap(), buf.begin().unwrap());
    assert_ne!(buf.begin().unwrap(), buf.end().unwrap());

    // A cloned handle shares the cell, so its cursors compare equal.
    let shared = buf.clone();
    assert_eq!(buf.begin().unwrap(), shared.begin().unwrap());

    // An equal but distinct buffer does not.
    let foreign = Buffer::try_from_slice(&[1, 2]).unwrap();
    assert_ne!(buf.begin().unwrap(), foreign.begin().unwrap());
}

#[test]
fn cursor_clone_preserves_identity() {
    let buf = Buffer::try_from_slice(&[9, 8, 7]).unwrap();
    let cursor = buf.begin().unwrap().try_step(1).unwrap();
    let copy = cursor.try_clone().unwrap();
    assert_eq!(copy, cursor);
    assert_eq!(copy.try_distance(&cursor).unwrap(), 0);
    assert_eq!(buf.share_count(), 3);
}

#[test]
fn standard_iteration() {
    let buf = Buffer::try_from_slice(&[1, 2, 3, 4]).unwrap();
    let cursor = buf.begin().unwrap();
    assert_eq!(cursor.len(), 4);
    let sum: u32 = cursor.map(u32::from).sum();
    assert_eq!(sum, 10);

    let mut partial = buf.begin().unwrap();
    partial.next();
    partial.next();
    assert_eq!(partial.len(), 2);
    assert_eq!(partial.collect::<Vec<u8>>(), vec![3, 4]);
}

#[test]
fn set_value_writes_through_shared_cell() {
    let buf = Buffer::try_from_slice(&[0, 0, 0]).unwrap();
    let mut cursor = buf.begin().unwrap();
    cursor.try_seek(1).unwrap();
    cursor.set_value(0xEE).unwrap();
    assert_eq!(buf.as_slice(), &[0, 0xEE, 0]);
}

#[test]
fn set_value_rejects_read_only() {
    let buf = Buffer::from_static(b"fixed");
    let mut cursor = buf.begin().unwrap();
    let err = cursor.set_value(0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyViolation);
}

#[test]
fn empty_handle_cursors() {
    let buf = Buffer::new();
    let mut cursor = buf.begin().unwrap();
    assert_eq!(cursor, buf.end().unwrap());
    assert_eq!(cursor.value().unwrap_err().kind(), ErrorKind::InvalidIterator);
    assert_eq!(cursor.next(), None);
    assert_eq!(cursor.max_index(), 0);
}

#[test]
fn range_between_cursors() {
    let buf = Buffer::try_from_slice(b"0123456789").unwrap();
    let start = buf.begin().unwrap().try_step(2).unwrap();
    let end = buf.begin().unwrap().try_step(7).unwrap();
    let part = buf.try_range_between(&start, &end).unwrap();
    assert_eq!(part.as_slice(), b"23456");

    let err = buf.try_range_between(&end, &start).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRange);

    let foreign = Buffer::try_from_slice(b"0123456789").unwrap();
    let err = buf
        .try_range_between(&foreign.begin().unwrap(), &end)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidIterator);
}
