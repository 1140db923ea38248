mod common;

use areafs::id::ID_NONE;
use common::{shape, Image, ROOT};
use proptest::prelude::*;

/// A small tree spread over three data areas, with superseded records,
/// children scanned before their parents and a deleted file.
fn busy_image() -> Image {
    let mut img = Image::standard();
    img.inode(2, 0x1000_0001, 0, 0x5, "early child");
    img.inode(1, 0x5, 0, ROOT, "dir");
    img.inode(0, 0x1000_0002, 0, ROOT, "v0");
    img.inode(2, 0x1000_0002, 1, 0x5, "v1");
    img.block(0, 0x8000_0001, 0, 0x1000_0002, ID_NONE, b"head");
    img.block(1, 0x8000_0002, 0, 0x1000_0002, 0x8000_0001, b"tail");
    img.block(2, 0x8000_0002, 1, 0x1000_0002, 0x8000_0001, b"tail, rewritten");
    img.inode(1, 0x1000_0003, 0, ROOT, "gone");
    img.inode(2, 0x1000_0003, 1, ID_NONE, "gone");
    img
}

proptest! {
    #[test]
    fn area_order_does_not_change_the_result(order in Just(vec![0usize, 1, 2, 3]).prop_shuffle()) {
        let mut forward = busy_image();
        let expected = shape(&forward.restore().unwrap());

        let mut shuffled = busy_image();
        shuffled.descs = order.iter().map(|&i| shuffled.descs[i]).collect();
        let fs = shuffled.restore().unwrap();

        prop_assert_eq!(shape(&fs), expected);
    }

    #[test]
    fn scanner_resyncs_after_garbage(garbage in prop::collection::vec(0u8..0xff, 1..48)) {
        let mut img = Image::standard();
        img.inode(0, 0x1000_0001, 0, ROOT, "before");
        img.raw(0, &garbage);
        img.inode(0, 0x1000_0002, 0, ROOT, "after");

        let fs = img.restore().unwrap();

        prop_assert!(fs.lookup(&mut img.flash, "/before").is_ok());
        prop_assert!(fs.lookup(&mut img.flash, "/after").is_ok());
    }
}
