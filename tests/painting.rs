use image::Rgba;
use kurbo::Point;
use paintcore::{BrushEngine, Compositor, Dab, Document, EditorSettings, LayerStack, PointerEvent, ToolMode};

fn red_dab(x: f32, y: f32) -> Dab {
    Dab {
        x,
        y,
        radius: 10.0,
        hardness: 1.0,
        color: Rgba([255, 0, 0, 255]),
        alpha: 1.0,
        is_eraser: false,
    }
}

#[test]
fn hard_red_dab_on_opaque_layer() {
    let base = Rgba([30, 60, 90, 255]);
    let mut stack = LayerStack::with_background(100, 100, base);
    let id = stack.layers()[0].id;
    let mut brush = BrushEngine::default();

    let mut target = stack.stroke_target(id).unwrap();
    assert!(brush.draw_dab(&mut target, &red_dab(50.0, 50.0), true));

    let pixels = &stack.layer(id).unwrap().pixels;
    assert_eq!(*pixels.get_pixel(50, 50), Rgba([255, 0, 0, 255]));
    assert_eq!(*pixels.get_pixel(50, 65), base);
}

#[test]
fn erased_square_is_transparent_but_buffer_keeps_colour() {
    let black = Rgba([0, 0, 0, 255]);
    let mut stack = LayerStack::with_background(40, 40, black);
    let id = stack.layers()[0].id;
    let mut brush = BrushEngine::default();
    let pen = Dab {
        radius: 0.5,
        hardness: 1.0,
        is_eraser: true,
        ..red_dab(0.0, 0.0)
    };

    {
        let mut target = stack.stroke_target(id).unwrap();
        for y in 0..20 {
            let yf = y as f32;
            brush.erase_dab_linear(&mut target, &pen.at(0.0, yf), y == 0);
            brush.erase_line_linear(&mut target, (0.0, yf), (19.0, yf), 1.0, &pen);
        }
    }

    let mut compositor = Compositor::new();
    let out = compositor.render(&stack, 40, 40);
    for y in 0..40 {
        for x in 0..40 {
            let alpha = out.get_pixel(x, y)[3];
            if x < 20 && y < 20 {
                assert_eq!(alpha, 0, "({x},{y}) should be erased");
            } else {
                assert_eq!(alpha, 255, "({x},{y}) should be untouched");
            }
        }
    }

    let pixels = &stack.layer(id).unwrap().pixels;
    for (x, y) in [(0, 0), (10, 10), (19, 19)] {
        assert_eq!(*pixels.get_pixel(x, y), black);
    }
}

#[test]
fn clearing_the_mask_restores_the_composite() {
    let mut doc = Document::new(64, 48, EditorSettings::default());
    let id = doc.stack().layers()[0].id;
    doc.brush.settings.size = 12.0;
    doc.brush.settings.hardness = 0.4;
    let before = doc.render();

    assert_eq!(doc.request_tool(ToolMode::Eraser), paintcore::ToolRequest::Switched);
    doc.handle_pointer(PointerEvent::down(5.0, 5.0), Point::ZERO);
    doc.handle_pointer(PointerEvent::moved(40.0, 30.0), Point::ZERO);
    doc.handle_pointer(PointerEvent::up(55.0, 40.0), Point::ZERO);
    assert_ne!(doc.render(), before);

    assert!(doc.clear_layer_alpha_mask(id));
    assert_eq!(doc.render(), before);
    assert!(!doc.clear_layer_alpha_mask(id));
}

#[test]
fn line_dab_count_and_gaps() {
    let mut stack = LayerStack::with_background(200, 50, Rgba([255, 255, 255, 255]));
    let id = stack.layers()[0].id;
    let mut brush = BrushEngine::default();
    let dab = Dab { radius: 2.0, ..red_dab(0.0, 0.0) };

    for (from, to, spacing) in [
        ((10.0, 10.0), (110.0, 10.0), 7.0f32),
        ((10.0, 10.0), (13.0, 14.0), 2.5),
        ((20.0, 20.0), (20.0, 20.0), 4.0),
        ((0.0, 0.0), (150.0, 40.0), 0.2),
    ] {
        let mut target = stack.stroke_target(id).unwrap();
        let placed = brush.draw_line(&mut target, from, to, spacing, &dab);
        let (dx, dy) = (to.0 - from.0, to.1 - from.1);
        let d = (dx * dx + dy * dy).sqrt();
        let s = spacing.max(1.0);
        assert_eq!(placed, ((d / s).ceil() as usize).max(1));
        assert!(d / placed as f32 <= s + 1e-4);
    }
}

#[test]
fn one_history_entry_per_stroke() {
    let mut doc = Document::new(32, 32, EditorSettings::default());
    let entries = doc.history().len();
    doc.handle_pointer(PointerEvent::down(2.0, 2.0), Point::ZERO);
    for i in 3..30 {
        doc.handle_pointer(PointerEvent::moved(i as f64, i as f64), Point::ZERO);
    }
    doc.handle_pointer(PointerEvent::up(30.0, 30.0), Point::ZERO);
    assert_eq!(doc.history().len(), entries + 1);
    assert_eq!(doc.history().undo_label(), Some("Brush Stroke"));
    assert!(doc.render_requests() > 0);
}
