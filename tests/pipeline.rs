use std::collections::HashMap;
use std::io::Cursor;

use badgey::compose::ImageSource;
use badgey::{bmp, dithering, render, Compositor, ContentBlock, FontBook, ImageBlock, Layout, PackedBitmap, TextBlock};
use badgey::{BADGE_HEIGHT, BADGE_WIDTH, FB_BYTES};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

fn png(img: RgbaImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn checkerboard() -> PackedBitmap {
    let mut bitmap = PackedBitmap::blank();
    for y in 0..BADGE_HEIGHT {
        for x in 0..BADGE_WIDTH {
            bitmap.set(x, y, (x / 8 + y / 8) % 2 == 0);
        }
    }
    bitmap
}

#[test]
fn black_square_survives_compose_dither_and_bmp() {
    let fonts = FontBook::new();
    let images = HashMap::from([(
        "square.png".to_string(),
        png(RgbaImage::from_pixel(58, 58, Rgba([0, 0, 0, 255]))),
    )]);
    let blocks = [ContentBlock::Image(ImageBlock::new("square.png"))];
    let compositor = Compositor::new(&fonts, &images);

    let screen = render(&blocks, &compositor, 1.0);
    assert_eq!(screen.as_bytes().len(), FB_BYTES);
    // 58 fits 116 wide exactly: x 6..122, y 6..122
    assert_eq!(screen.black_pixels(), 116 * 116);
    assert!(screen.is_black(6, 6));
    assert!(screen.is_black(121, 121));
    assert!(!screen.is_black(5, 6));
    assert!(!screen.is_black(6, 122));

    let file = bmp::encode_native(&screen);
    assert_eq!(bmp::decode_native(&file), Some(screen));
}

#[test]
fn native_bitmap_is_sent_bit_for_bit() {
    let expected = checkerboard();
    let mut images = HashMap::new();
    images.insert("screen.bmp".to_string(), bmp::encode_native(&expected));

    let mut layout = Layout::from_toml_str(
        r#"
            [[blocks]]
            type = "text"
            text = "ignored"

            [[blocks]]
            type = "image"
            source = "screen.bmp"
        "#,
    )
    .unwrap();
    layout.detect_native(&images);

    let fonts = FontBook::new();
    let compositor = Compositor::new(&fonts, &images);
    // gamma must not touch native bits
    assert_eq!(render(&layout.blocks, &compositor, 2.2), expected);
}

#[test]
fn blank_layout_renders_white() {
    let fonts = FontBook::new();
    let images: HashMap<String, Vec<u8>> = HashMap::new();
    let compositor = Compositor::new(&fonts, &images);
    let blocks = [ContentBlock::Text(TextBlock::new("no fonts loaded"))];

    let screen = render(&blocks, &compositor, 1.0);
    assert_eq!(screen, PackedBitmap::blank());
    assert_eq!(dithering::quantize(&compositor.compose(&[]), 1.0), PackedBitmap::blank());
}

#[test]
fn layout_on_disk_resolves_images_next_to_it() {
    let dir = std::env::temp_dir().join(format!("badgey-pipeline-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let screen = checkerboard();
    bmp::write_native(&screen, std::fs::File::create(dir.join("native.bmp")).unwrap()).unwrap();
    std::fs::write(
        dir.join("layout.toml"),
        "[[blocks]]\ntype = \"image\"\nsource = \"native.bmp\"\n",
    )
    .unwrap();

    let (layout, images) = Layout::load(&dir.join("layout.toml")).unwrap();
    assert!(images.open("native.bmp").is_ok());
    let fonts = FontBook::new();
    let compositor = Compositor::new(&fonts, &images);
    assert_eq!(render(&layout.blocks, &compositor, 1.0), screen);

    std::fs::remove_dir_all(&dir).unwrap();
}
