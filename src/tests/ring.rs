use crate::ring::RingBuffer;

#[test]
fn spans_stop_at_the_wrap_point() {
    let mut ring = RingBuffer::new(8);
    assert_eq!(ring.write_linear(&[1, 2, 3, 4, 5, 6]), 6);
    let mut sink = [0u8; 4];
    assert_eq!(ring.read_linear(&mut sink), 4);
    assert_eq!(sink, [1, 2, 3, 4]);

    // write position is 6, so only two bytes are contiguous
    assert_eq!(ring.write_span().len(), 2);
    assert_eq!(ring.write_linear(&[7, 8, 9, 10, 11]), 5);
    assert_eq!(ring.total_unread(), 7);
    assert_eq!(ring.total_free(), 1);

    assert_eq!(ring.read_span(), &[5, 6, 7, 8]);
    let mut all = [0u8; 8];
    assert_eq!(ring.read_linear(&mut all), 7);
    assert_eq!(&all[..7], &[5, 6, 7, 8, 9, 10, 11]);
    assert_eq!(ring.total_unread(), 0);
}

#[test]
fn full_ring_refuses_writes() {
    let mut ring = RingBuffer::new(4);
    assert_eq!(ring.write_linear(&[9; 10]), 4);
    assert_eq!(ring.write_linear(&[1]), 0);
    assert!(ring.write_span().is_empty());
    assert_eq!(ring.discard(3), 3);
    assert_eq!(ring.write_zero(8), 3);
    let mut out = [0xaa; 4];
    ring.read_linear(&mut out);
    assert_eq!(out, [9, 0, 0, 0]);
}

#[test]
fn samples_peek_across_the_wrap() {
    let mut ring = RingBuffer::new(4 * 8);
    ring.write_samples(&[1, 2, 3]);
    let mut two = [0i64; 2];
    ring.read_samples(&mut two);
    assert_eq!(two, [1, 2]);
    assert_eq!(ring.write_samples(&[4, 5, 6, 7]), 3);
    assert_eq!(ring.unread_samples(), 4);

    let mut peeked = [0i64; 4];
    assert_eq!(ring.peek_samples(&mut peeked), 4);
    assert_eq!(peeked, [3, 4, 5, 6]);
    assert_eq!(ring.unread_samples(), 4);

    let mut read = [0i64; 4];
    ring.read_samples(&mut read);
    assert_eq!(read, peeked);
}

#[test]
fn reset_and_free() {
    let mut ring = RingBuffer::new(16);
    ring.write_linear(&[1; 12]);
    ring.reset();
    assert_eq!(ring.total_unread(), 0);
    assert_eq!(ring.total_free(), 16);

    ring.free();
    assert_eq!(ring.capacity(), 0);
    assert_eq!(ring.write_linear(&[1, 2]), 0);
    assert!(ring.read_span().is_empty());
}
