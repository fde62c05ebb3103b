use image::{Rgba, RgbaImage};
use kurbo::{Point, Vec2};
use paintcore::{
    AlphaMask, AsyncOutcome, CollaboratorResult, Document, EditorError, EditorSettings,
    HistoryRequest, PendingAction, PendingDecision, PointerEvent, ToolMode, ToolRequest,
};

fn stroke(doc: &mut Document, from: (f64, f64), to: (f64, f64)) {
    doc.handle_pointer(PointerEvent::down(from.0, from.1), Point::ZERO);
    doc.handle_pointer(PointerEvent::moved((from.0 + to.0) / 2.0, (from.1 + to.1) / 2.0), Point::ZERO);
    doc.handle_pointer(PointerEvent::moved(to.0, to.1), Point::ZERO);
    doc.handle_pointer(PointerEvent::up(to.0, to.1), Point::ZERO);
}

/// Same gesture, named for session tools.
fn drag(doc: &mut Document, from: (f64, f64), to: (f64, f64)) {
    stroke(doc, from, to);
}

#[test]
fn history_depth_is_bounded() {
    let settings = EditorSettings {
        max_history: 5,
        ..EditorSettings::default()
    };
    let mut doc = Document::new(32, 32, settings);
    for i in 0..12 {
        let y = 2.0 + i as f64 * 2.0;
        stroke(&mut doc, (2.0, y), (28.0, y));
    }
    assert_eq!(doc.history().len(), 5);

    let mut undos = 0;
    while doc.undo() == HistoryRequest::Applied {
        undos += 1;
    }
    assert_eq!(undos, 4);
    assert!(!doc.can_undo());
    assert_eq!(doc.undo(), HistoryRequest::Boundary);
}

#[test]
fn large_canvas_keeps_full_history_under_default_settings() {
    let mut doc = Document::new(4096, 4096, EditorSettings::default());
    for i in 0..12 {
        let y = 10.0 + i as f64 * 20.0;
        stroke(&mut doc, (10.0, y), (60.0, y));
    }
    assert_eq!(doc.history().len(), 13);
    assert!(doc.history().memory_usage() < 128 * 1024 * 1024);
}

#[test]
fn undo_then_redo_restores_exact_state() {
    let mut doc = Document::new(48, 48, EditorSettings::default());
    let second = doc.add_layer("Ink").unwrap();
    stroke(&mut doc, (4.0, 4.0), (40.0, 30.0));
    doc.request_tool(ToolMode::Eraser);
    stroke(&mut doc, (10.0, 40.0), (30.0, 8.0));

    let layers_before: Vec<_> = doc.stack().layers().to_vec();
    let mask_before = doc.stack().masks().get_mask(second).cloned();
    assert!(mask_before.is_some());

    assert_eq!(doc.undo(), HistoryRequest::Applied);
    assert_ne!(doc.stack().masks().get_mask(second).cloned(), mask_before);
    assert_eq!(doc.redo(), HistoryRequest::Applied);

    let layers_after = doc.stack().layers();
    assert_eq!(layers_after.len(), layers_before.len());
    for (a, b) in layers_before.iter().zip(layers_after) {
        assert_eq!(a.id, b.id);
        assert!(a.pixels.same_pixels(&b.pixels));
    }
    assert_eq!(doc.stack().masks().get_mask(second).cloned(), mask_before);
    assert_eq!(doc.redo(), HistoryRequest::Boundary);
}

#[test]
fn tiny_crop_is_discarded() {
    let mut doc = Document::new(64, 64, EditorSettings::default());
    doc.request_tool(ToolMode::Crop);
    drag(&mut doc, (10.0, 10.0), (14.0, 14.0));
    assert_eq!(doc.crop().crop_area(), None);
    assert!(!doc.apply_crop());
    assert_eq!((doc.width(), doc.height()), (64, 64));
}

#[test]
fn crop_apply_and_undo() {
    let mut doc = Document::new(64, 48, EditorSettings::default());
    let entries = doc.history().len();
    doc.request_tool(ToolMode::Crop);
    drag(&mut doc, (10.0, 10.0), (40.0, 30.0));
    assert!(doc.crop().crop_area().is_some());

    assert!(doc.apply_crop());
    assert_eq!((doc.width(), doc.height()), (30, 20));
    assert_eq!(doc.stack().layers()[0].original_size(), (30, 20));
    assert_eq!(doc.crop().crop_area(), None);
    assert_eq!(doc.history().len(), entries + 1);

    assert_eq!(doc.undo(), HistoryRequest::Applied);
    assert_eq!((doc.width(), doc.height()), (64, 48));
    assert_eq!(doc.stack().layers()[0].original_size(), (64, 48));
}

#[test]
fn pending_transform_blocks_tool_switch_and_undo() {
    let mut doc = Document::new(64, 48, EditorSettings::default());
    let id = doc.stack().layers()[0].id;
    let entries = doc.history().len();

    assert_eq!(doc.request_tool(ToolMode::Transform), ToolRequest::Switched);
    drag(&mut doc, (32.0, 24.0), (42.0, 24.0));
    assert!(doc.has_pending_transform());
    assert_eq!(doc.transform().unwrap().translation(), Vec2::new(10.0, 0.0));

    assert_eq!(doc.request_tool(ToolMode::Brush), ToolRequest::NeedsDecision);
    assert_eq!(doc.tool(), ToolMode::Transform);
    assert_eq!(doc.resolve_pending(PendingDecision::Cancel), None);
    assert!(doc.has_pending_transform());

    assert_eq!(doc.undo(), HistoryRequest::NeedsDecision);
    assert_eq!(doc.pending_action(), Some(PendingAction::Undo));
    assert!(matches!(doc.rotate_canvas(1), Err(EditorError::PendingTransform)));

    assert_eq!(doc.request_tool(ToolMode::Brush), ToolRequest::NeedsDecision);
    assert_eq!(
        doc.resolve_pending(PendingDecision::Discard),
        Some(PendingAction::SwitchTool(ToolMode::Brush))
    );
    assert_eq!(doc.tool(), ToolMode::Brush);
    assert!(!doc.has_pending_transform());
    let layer = doc.stack().layer(id).unwrap();
    assert_eq!(layer.position, Point::ZERO);
    assert_eq!(layer.original_size(), (64, 48));
    assert_eq!(doc.history().len(), entries);
}

#[test]
fn brush_input_drives_a_transform_started_from_the_api() {
    let mut doc = Document::new(64, 48, EditorSettings::default());
    let id = doc.stack().layers()[0].id;
    let pixels_before = doc.stack().layer(id).unwrap().pixels.clone();
    let entries = doc.history().len();
    assert_eq!(doc.tool(), ToolMode::Brush);

    doc.start_transform(&[id]).unwrap();
    drag(&mut doc, (32.0, 24.0), (42.0, 24.0));
    assert_eq!(doc.transform().unwrap().translation(), Vec2::new(10.0, 0.0));
    assert!(doc.stack().layer(id).unwrap().pixels.same_pixels(&pixels_before));
    assert_eq!(doc.history().len(), entries);

    doc.cancel_transform();
    assert!(doc.stack().layer(id).unwrap().pixels.same_pixels(&pixels_before));
    assert_eq!(doc.history().len(), entries);
    assert_eq!(doc.tool(), ToolMode::Brush);
}

#[test]
fn applied_transform_is_rasterized_and_undoable() {
    let mut doc = Document::new(64, 48, EditorSettings::default());
    let id = doc.stack().layers()[0].id;
    doc.request_tool(ToolMode::Transform);
    drag(&mut doc, (32.0, 24.0), (42.0, 24.0));

    let preview = doc.render();
    assert_eq!(preview.get_pixel(5, 5)[3], 0);
    assert_eq!(doc.stack().layer(id).unwrap().position, Point::ZERO);

    assert_eq!(doc.request_tool(ToolMode::Brush), ToolRequest::NeedsDecision);
    doc.resolve_pending(PendingDecision::Apply);
    let layer = doc.stack().layer(id).unwrap();
    assert_eq!(layer.position, Point::new(10.0, 0.0));
    assert_eq!(doc.history().undo_label(), Some("Transform"));

    let out = doc.render();
    assert_eq!(out.get_pixel(5, 5)[3], 0);
    assert_eq!(*out.get_pixel(30, 20), Rgba([255, 255, 255, 255]));

    assert_eq!(doc.undo(), HistoryRequest::Applied);
    assert_eq!(doc.stack().layer(id).unwrap().position, Point::ZERO);
}

#[test]
fn async_results_respect_generation() {
    let mut doc = Document::new(16, 16, EditorSettings::default());
    let id = doc.stack().layers()[0].id;
    let red = RgbaImage::from_pixel(16, 16, Rgba([255, 0, 0, 255]));
    let result = |label: &str| CollaboratorResult {
        label: label.to_string(),
        pixels: red.clone(),
        mask: None,
    };

    let stale = doc.begin_async(id).unwrap();
    stroke(&mut doc, (2.0, 2.0), (12.0, 12.0));
    let entries = doc.history().len();
    assert_eq!(doc.apply_async_result(stale, Ok(result("Remove Background"))), AsyncOutcome::Stale);
    assert_eq!(doc.history().len(), entries);

    let ticket = doc.begin_async(id).unwrap();
    let failed = doc.apply_async_result(ticket, Err("model unavailable".into()));
    assert_eq!(failed, AsyncOutcome::Failed("model unavailable".into()));
    assert_eq!(doc.status(), Some("model unavailable"));
    assert_eq!(doc.history().len(), entries);

    let mut mask = AlphaMask::new_opaque(16, 16);
    mask.set(0, 0, 0);
    let applied = doc.apply_async_result(
        ticket,
        Ok(CollaboratorResult {
            mask: Some(mask),
            ..result("Remove Background")
        }),
    );
    assert_eq!(applied, AsyncOutcome::Applied);
    assert_eq!(doc.history().len(), entries + 1);
    let out = doc.render();
    assert_eq!(out.get_pixel(0, 0)[3], 0);
    assert_eq!(*out.get_pixel(8, 8), Rgba([255, 0, 0, 255]));

    let deleted = doc.begin_async(id).unwrap();
    doc.add_layer("Other").unwrap();
    doc.delete_layer(id).unwrap();
    assert_eq!(doc.apply_async_result(deleted, Ok(result("late"))), AsyncOutcome::Stale);
}

#[test]
fn async_result_is_stale_after_undo_and_a_different_edit() {
    let mut doc = Document::new(16, 16, EditorSettings::default());
    let id = doc.stack().layers()[0].id;
    stroke(&mut doc, (2.0, 2.0), (12.0, 2.0));
    let ticket = doc.begin_async(id).unwrap();

    assert_eq!(doc.undo(), HistoryRequest::Applied);
    stroke(&mut doc, (2.0, 12.0), (12.0, 12.0));
    let entries = doc.history().len();
    let before = doc.render();

    let result = CollaboratorResult {
        label: "Remove Background".to_string(),
        pixels: RgbaImage::from_pixel(16, 16, Rgba([0, 0, 255, 255])),
        mask: None,
    };
    assert_eq!(doc.apply_async_result(ticket, Ok(result)), AsyncOutcome::Stale);
    assert_eq!(doc.history().len(), entries);
    assert_eq!(doc.render(), before);
}

#[test]
fn rotate_canvas_swaps_dimensions() {
    let mut doc = Document::new(64, 48, EditorSettings::default());
    doc.rotate_canvas(1).unwrap();
    assert_eq!((doc.width(), doc.height(), doc.rotation()), (48, 64, 90));
    let layer = &doc.stack().layers()[0];
    assert_eq!(layer.original_size(), (48, 64));
    assert_eq!(layer.position, Point::ZERO);

    doc.rotate_canvas(-1).unwrap();
    assert_eq!((doc.width(), doc.height(), doc.rotation()), (64, 48, 0));
    doc.undo();
    assert_eq!((doc.width(), doc.height()), (48, 64));
}

#[test]
fn structural_errors_leave_history_alone() {
    let mut doc = Document::new(16, 16, EditorSettings::default());
    let id = doc.stack().layers()[0].id;
    let entries = doc.history().len();
    assert!(matches!(doc.delete_layer(id), Err(EditorError::MinimumOneLayer)));
    assert!(doc.status().is_some());
    assert!(matches!(doc.resize_layer(id, 0, 4), Err(EditorError::InvalidGeometry(_))));
    assert_eq!(doc.history().len(), entries);

    doc.resize_layer(id, 8, 4).unwrap();
    assert_eq!(doc.stack().layer(id).unwrap().original_size(), (8, 4));
}

#[test]
fn file_bytes_round_trip() {
    let mut doc = Document::new(24, 16, EditorSettings::default());
    let top = doc.add_layer("Top").unwrap();
    doc.request_tool(ToolMode::Eraser);
    stroke(&mut doc, (1.0, 1.0), (20.0, 10.0));
    let before = doc.render();

    let bytes = doc.to_file_bytes().unwrap();
    let mut loaded = Document::from_file_bytes(&bytes, EditorSettings::default()).unwrap();
    assert_eq!((loaded.width(), loaded.height()), (24, 16));
    assert_eq!(loaded.stack().len(), 2);
    assert_eq!(loaded.stack().active(), Some(top));
    assert!(loaded.stack().masks().has_mask(top));
    assert_eq!(loaded.render(), before);
    assert!(!loaded.can_undo());
}
