//! End-to-end tests of buffers, descriptors and the accelerator context.

use std::sync::Arc;

use rga_rust::drm::{
    find_mode, BoFlags, BufferObject, ConnectorSpec, DeviceConfig, DisplayTarget, DrmDevice,
    DRIVER_NAME,
};
use rga_rust::format::{unpack_argb, PixelFormat};
use rga_rust::rga::{
    composite, Blend, BatchConfig, EngineFault, ImageError, InvalidOperation, Rect, RgaContext, RgaError,
    RgaImage, Rotation,
};
use rstest::rstest;

fn device() -> Arc<DrmDevice> {
    DrmDevice::open(DRIVER_NAME, DeviceConfig::with_single_mode(64, 64)).unwrap()
}

fn argb_buffer(dev: &Arc<DrmDevice>, w: u32, h: u32) -> BufferObject {
    BufferObject::create(dev, (w * h * 4) as usize, BoFlags::empty()).unwrap()
}

fn close_to(actual: u32, expected: u32, tolerance: i32) -> bool {
    unpack_argb(actual)
        .iter()
        .zip(unpack_argb(expected).iter())
        .all(|(&a, &e)| (i32::from(a) - i32::from(e)).abs() <= tolerance)
}

#[test]
fn red_fill_reaches_the_screen() {
    let dev = device();
    let spec: ConnectorSpec = "31:64x64".parse().unwrap();
    let sel = find_mode(&dev, &spec).unwrap();
    assert_eq!(sel.crtc_id, 29);

    let bo = argb_buffer(&dev, 64, 64);
    let mut display = DisplayTarget::new(&dev);
    let fb = display.bind(&bo, 64, 64, PixelFormat::Nv12).unwrap();
    display.present_on(fb, &sel).unwrap();

    let fd = bo.export().unwrap();
    let dst = RgaImage::new(&fd, 64, 64, PixelFormat::Nv12).with_fill_color(0xFFFF_0000);
    let mut ctx = RgaContext::open(&dev).unwrap();
    ctx.solid_fill(&dst, dst.bounds()).unwrap();
    ctx.execute().unwrap();

    let frame = display.read_scanout(sel.crtc_id).unwrap();
    assert_eq!((frame.width, frame.height), (64, 64));
    for (x, y) in [(0, 0), (63, 0), (31, 31), (0, 63), (63, 63)] {
        let px = frame.pixel(x, y).unwrap();
        assert!(close_to(px, 0xFFFF_0000, 3), "pixel ({x},{y}) = {px:08x}");
    }
    display.release(fb).unwrap();
}

#[test]
fn red_fill_is_exact_on_argb_scanout() {
    let dev = device();
    let sel = find_mode(&dev, &"31:64x64".parse().unwrap()).unwrap();
    let bo = argb_buffer(&dev, 64, 64);
    let mut display = DisplayTarget::new(&dev);
    let fb = display.bind(&bo, 64, 64, PixelFormat::Argb8888).unwrap();
    display.present_on(fb, &sel).unwrap();

    let map = bo.map().unwrap();
    let dst = RgaImage::new(map, 64, 64, PixelFormat::Argb8888).with_fill_color(0xFFFF_0000);
    let mut ctx = RgaContext::open(&dev).unwrap();
    ctx.solid_fill(&dst, dst.bounds()).unwrap();
    ctx.execute().unwrap();

    for i in 0..64 * 64 {
        assert_eq!(map.read_u32(i * 4), Some(0xFFFF_0000), "pixel {i}");
    }
    let frame = display.read_scanout(sel.crtc_id).unwrap();
    for y in 0..64 {
        for x in 0..64 {
            assert_eq!(frame.pixel(x, y), Some(0xFFFF_0000), "scanout ({x},{y})");
        }
    }
    display.release(fb).unwrap();
}

#[test]
fn nv12_fill_writes_both_planes() {
    let dev = device();
    let bo = BufferObject::create(&dev, 8 * 8 * 3 / 2, BoFlags::empty()).unwrap();
    let map = bo.map().unwrap();
    let img = RgaImage::new(map, 8, 8, PixelFormat::Nv12).with_fill_color(0xFFFF_0000);
    let mut ctx = RgaContext::open(&dev).unwrap();
    ctx.solid_fill(&img, img.bounds()).unwrap();
    ctx.execute().unwrap();

    let bytes = map.to_vec();
    assert!(bytes[..64].iter().all(|&y| y == 82));
    for uv in bytes[64..].chunks(2) {
        assert_eq!(uv, [90, 240]);
    }
}

#[test]
fn rejected_enqueue_leaves_batch_untouched() {
    let dev = device();
    let bo = argb_buffer(&dev, 16, 16);
    let map = bo.map().unwrap();
    let img = RgaImage::new(map, 16, 16, PixelFormat::Argb8888).with_fill_color(0xFF11_2233);
    let mut ctx = RgaContext::open(&dev).unwrap();

    ctx.solid_fill(&img, Rect::new(0, 0, 4, 4)).unwrap();
    let err = ctx.solid_fill(&img, Rect::new(10, 10, 8, 8)).unwrap_err();
    assert!(matches!(
        err,
        RgaError::InvalidOperation(InvalidOperation::RectOutOfBounds { .. })
    ));
    assert_eq!(ctx.pending(), 1);

    ctx.execute().unwrap();
    assert_eq!(map.read_u32(0), Some(0xFF11_2233));
    // Only the accepted rectangle was filled.
    assert_eq!(map.read_u32((10 * 16 + 10) * 4), Some(0));
}

#[test]
fn invalid_descriptor_is_reported_with_role() {
    let dev = device();
    let bo = argb_buffer(&dev, 8, 8);
    let map = bo.map().unwrap();
    let src = RgaImage::new(map, 8, 8, PixelFormat::Argb8888);
    let dst = RgaImage::new(map, 16, 16, PixelFormat::Argb8888);
    let mut ctx = RgaContext::open(&dev).unwrap();

    let err = ctx.copy(&src, &dst, src.bounds(), src.bounds()).unwrap_err();
    match err {
        RgaError::InvalidOperation(InvalidOperation::Image { role, source }) => {
            assert_eq!(role, "destination");
            assert!(matches!(source, ImageError::BackingTooSmall { .. }));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(ctx.pending(), 0);
}

#[test]
fn full_batch_refuses_more_work() {
    let dev = device();
    let bo = argb_buffer(&dev, 4, 4);
    let map = bo.map().unwrap();
    let img = RgaImage::new(map, 4, 4, PixelFormat::Argb8888);
    let mut ctx = RgaContext::with_config(&dev, BatchConfig::with_max_commands(2)).unwrap();

    ctx.solid_fill(&img, img.bounds()).unwrap();
    ctx.solid_fill(&img, img.bounds()).unwrap();
    assert_eq!(
        ctx.solid_fill(&img, img.bounds()),
        Err(RgaError::BatchFull { capacity: 2 })
    );
    ctx.execute().unwrap();
    assert_eq!(ctx.stats().commands_executed, 2);
    ctx.solid_fill(&img, img.bounds()).unwrap();
}

#[test]
fn destroyed_mapping_fails_the_whole_batch() {
    let dev = device();
    let keep = argb_buffer(&dev, 4, 4);
    let doomed = argb_buffer(&dev, 4, 4);
    let keep_map = keep.map().unwrap();
    let mut ctx = RgaContext::open(&dev).unwrap();

    {
        let first = RgaImage::new(keep_map, 4, 4, PixelFormat::Argb8888).with_fill_color(0xFFFF_FFFF);
        ctx.solid_fill(&first, first.bounds()).unwrap();
        let map = doomed.map().unwrap();
        let second = RgaImage::new(map, 4, 4, PixelFormat::Argb8888);
        ctx.solid_fill(&second, second.bounds()).unwrap();
    }
    let handle = doomed.handle();
    doomed.destroy();

    let err = ctx.execute().unwrap_err();
    assert_eq!(
        err,
        RgaError::Execution(EngineFault::StaleBuffer {
            index: 1,
            command: "fill",
            handle,
        })
    );
    assert_eq!(ctx.pending(), 0);
    assert_eq!(ctx.stats().failed_batches, 1);
    // The job was refused before anything ran.
    assert_eq!(keep_map.read_u32(0), Some(0));
}

#[test]
fn prime_handle_outlives_destroy() {
    let dev = device();
    let bo = argb_buffer(&dev, 4, 4);
    let fd = bo.export().unwrap();
    bo.destroy();
    assert_eq!(dev.gem_count(), 0);

    let img = RgaImage::new(&fd, 4, 4, PixelFormat::Argb8888).with_fill_color(0xFF00_FF00);
    let mut ctx = RgaContext::open(&dev).unwrap();
    ctx.solid_fill(&img, img.bounds()).unwrap();
    ctx.execute().unwrap();
    assert_eq!(
        fd.read(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        0xFF00_FF00
    );
    fd.close();
    assert_eq!(dev.open_prime_fds(), 0);
}

#[test]
fn flush_syncs_shared_destination() {
    let dev = device();
    let bo = argb_buffer(&dev, 8, 8);
    let fd = bo.export().unwrap();
    let img = RgaImage::new(&fd, 8, 8, PixelFormat::Argb8888).with_flush(true);
    let mut ctx = RgaContext::open(&dev).unwrap();
    ctx.solid_fill(&img, Rect::new(0, 0, 4, 4)).unwrap();
    ctx.solid_fill(&img, Rect::new(4, 4, 4, 4)).unwrap();
    ctx.execute().unwrap();
    assert_eq!(fd.sync_count(), 1);
}

#[test]
fn scaled_copy_upsamples_quadrants() {
    let dev = device();
    let src_bo = argb_buffer(&dev, 2, 2);
    let dst_bo = argb_buffer(&dev, 8, 8);
    let src_map = src_bo.map().unwrap();
    let dst_map = dst_bo.map().unwrap();
    let src = RgaImage::new(src_map, 2, 2, PixelFormat::Argb8888);
    let dst = RgaImage::new(dst_map, 8, 8, PixelFormat::Argb8888);
    let colors = [0xFFFF_0000u32, 0xFF00_FF00, 0xFF00_00FF, 0xFFFF_FFFF];
    src_map.write(|b| {
        for (chunk, c) in b.chunks_mut(4).zip(colors) {
            chunk.copy_from_slice(&c.to_le_bytes());
        }
    });

    let mut ctx = RgaContext::open(&dev).unwrap();
    ctx.copy_with_scale(&src, &dst, src.bounds(), dst.bounds()).unwrap();
    ctx.execute().unwrap();

    let px = |x: usize, y: usize| dst_map.read_u32((y * 8 + x) * 4).unwrap();
    assert_eq!(px(0, 0), colors[0]);
    assert_eq!(px(7, 3), colors[1]);
    assert_eq!(px(3, 4), colors[2]);
    assert_eq!(px(7, 7), colors[3]);
}

#[test]
fn rotation_needs_transposed_footprint() {
    let dev = device();
    let bo = argb_buffer(&dev, 8, 8);
    let map = bo.map().unwrap();
    let img = RgaImage::new(map, 8, 8, PixelFormat::Argb8888);
    let mut ctx = RgaContext::open(&dev).unwrap();
    let err = ctx
        .copy_with_rotate(&img, &img, Rect::new(0, 0, 4, 2), Rect::new(0, 0, 4, 2), Rotation::Deg90)
        .unwrap_err();
    assert!(matches!(
        err,
        RgaError::InvalidOperation(InvalidOperation::RotationFootprint { width: 2, height: 4, .. })
    ));
    ctx.copy_with_rotate(&img, &img, Rect::new(0, 0, 4, 2), Rect::new(4, 4, 2, 4), Rotation::Deg90)
        .unwrap();
}

#[rstest]
#[case::opaque_source(Blend::constant(0xFF, 0xFF), 0xFFFF_0000)]
#[case::empty_destination(Blend::constant(0xFF, 0x00), 0xFFFF_0000)]
#[case::transparent_source(Blend::constant(0x00, 0xFF), 0xFF00_00FF)]
#[case::per_pixel_opaque(Blend::per_pixel(0xFF, 0xFF), 0xFFFF_0000)]
fn blend_boundaries(#[case] blend: Blend, #[case] expected: u32) {
    let dev = device();
    let src_bo = argb_buffer(&dev, 4, 4);
    let dst_bo = argb_buffer(&dev, 4, 4);
    let src_map = src_bo.map().unwrap();
    let dst_map = dst_bo.map().unwrap();
    let src = RgaImage::new(src_map, 4, 4, PixelFormat::Argb8888).with_fill_color(0xFFFF_0000);
    let dst = RgaImage::new(dst_map, 4, 4, PixelFormat::Argb8888).with_fill_color(0xFF00_00FF);

    let mut ctx = RgaContext::open(&dev).unwrap();
    ctx.solid_fill(&src, src.bounds()).unwrap();
    ctx.solid_fill(&dst, dst.bounds()).unwrap();
    ctx.blend(&src, &dst, src.bounds(), dst.bounds(), blend).unwrap();
    ctx.execute().unwrap();

    assert_eq!(dst_map.read_u32(0), Some(expected));
    assert_eq!(dst_map.read_u32(15 * 4), Some(expected));
}

#[rstest]
#[case(90)]
#[case(180)]
#[case(270)]
fn supported_angles_parse(#[case] degrees: u32) {
    let rotation = Rotation::try_from(degrees).unwrap();
    assert_eq!(rotation.degrees(), degrees);
}

#[rstest]
#[case(0)]
#[case(45)]
#[case(360)]
fn unsupported_angles_rejected(#[case] degrees: u32) {
    assert_eq!(
        Rotation::try_from(degrees),
        Err(InvalidOperation::UnsupportedRotation(degrees))
    );
}

#[test]
fn second_context_waits_for_first() {
    let dev = device();
    let first = RgaContext::open(&dev).unwrap();
    assert!(matches!(
        RgaContext::open(&dev),
        Err(RgaError::DeviceOpen { .. })
    ));
    first.close();
    assert!(RgaContext::open(&dev).is_ok());
}

#[test]
fn nv12_partial_write_updates_covered_blocks() {
    let dev = device();
    let dst_bo = BufferObject::create(&dev, 4 * 4 * 3 / 2, BoFlags::empty()).unwrap();
    let src_bo = argb_buffer(&dev, 3, 3);
    let (dst_map, src_map) = (dst_bo.map().unwrap(), src_bo.map().unwrap());
    let (red, blue) = (0xFFFF_0000u32, 0xFF00_00FFu32);
    // Bottom-right 2x2 of the source is half red, half blue.
    let src_px = [red, red, red, red, red, red, red, blue, blue];
    src_map.write(|b| {
        for (chunk, p) in b.chunks_exact_mut(4).zip(src_px) {
            chunk.copy_from_slice(&p.to_le_bytes());
        }
    });
    let src = RgaImage::new(src_map, 3, 3, PixelFormat::Argb8888);
    let dst = RgaImage::new(dst_map, 4, 4, PixelFormat::Nv12).with_fill_color(0xFF00_FF00);

    let mut ctx = RgaContext::open(&dev).unwrap();
    ctx.solid_fill(&dst, dst.bounds()).unwrap();
    ctx.copy(&src, &dst, src.bounds(), Rect::new(1, 1, 3, 3)).unwrap();
    ctx.execute().unwrap();

    // BT.601: green (144, 54, 34), red (82, 90, 240), blue (41, 240, 110).
    let bytes = dst_map.to_vec();
    let (luma, chroma) = bytes.split_at(16);
    assert_eq!(
        luma,
        [
            144, 144, 144, 144, //
            144, 82, 82, 82, //
            144, 82, 82, 82, //
            144, 82, 41, 41,
        ]
    );
    // Only the block at (2,2) has its top-left pixel inside the rect; it
    // takes the rounded mean of two red and two blue samples.
    assert_eq!(&chroma[..6], [54, 34, 54, 34, 54, 34]);
    assert_eq!(&chroma[6..], [165, 175]);
}

#[test]
fn blend_leaves_outside_of_rect_untouched() {
    let dev = device();
    let src_bo = argb_buffer(&dev, 2, 2);
    let dst_bo = argb_buffer(&dev, 6, 6);
    let (src_map, dst_map) = (src_bo.map().unwrap(), dst_bo.map().unwrap());
    let src = RgaImage::new(src_map, 2, 2, PixelFormat::Argb8888).with_fill_color(0xFFFF_0000);
    let dst = RgaImage::new(dst_map, 6, 6, PixelFormat::Argb8888).with_fill_color(0xFF00_00FF);
    let blend = Blend::constant(0x80, 0xFF);
    let dst_rect = Rect::new(2, 2, 3, 3);

    let mut ctx = RgaContext::open(&dev).unwrap();
    ctx.solid_fill(&src, src.bounds()).unwrap();
    ctx.solid_fill(&dst, dst.bounds()).unwrap();
    ctx.blend(&src, &dst, Rect::new(0, 0, 2, 2), dst_rect, blend).unwrap();
    ctx.execute().unwrap();

    let mixed = composite(0xFFFF_0000, 0xFF00_00FF, blend);
    assert_ne!(mixed, 0xFF00_00FF);
    for y in 0..6 {
        for x in 0..6 {
            let px = dst_map.read_u32(((y * 6 + x) * 4) as usize).unwrap();
            let expected = if dst_rect.contains_point(x, y) { mixed } else { 0xFF00_00FF };
            assert_eq!(px, expected, "pixel ({x},{y})");
        }
    }
}

#[test]
fn unaddressable_descriptor_is_refused_at_enqueue() {
    let dev = device();
    let bo = argb_buffer(&dev, 4, 4);
    let img = RgaImage::new(bo.map().unwrap(), 0x4000_0000, 1, PixelFormat::Argb8888);
    let mut ctx = RgaContext::open(&dev).unwrap();
    let err = ctx.solid_fill(&img, Rect::new(0, 0, 1, 1)).unwrap_err();
    assert!(matches!(
        err,
        RgaError::InvalidOperation(InvalidOperation::Image {
            role: "destination",
            source: ImageError::TooLarge { .. },
        })
    ));
    assert_eq!(ctx.pending(), 0);
}
