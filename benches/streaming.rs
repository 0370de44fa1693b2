use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, black_box};

use terrastream::core::SurveyFormat;
use terrastream::streaming::{
    SurveyBuffer, TilePriorityQueue,
    assemble_from_surveys, downsample_children, parse_survey,
};
use terrastream::terrain::{CoordinateMapper, SurveyTileKey, TileKey};

use glam::{IVec2, Vec2};

/// Uncompressed survey text of `size²` records
fn survey_text(size: usize) -> Vec<u8> {
    let mut text = String::with_capacity(size * size * 29);
    for row in 0..size {
        for column in 0..size {
            let height = ((row * 7 + column * 3) % 5000) as f32 * 0.01 + 40.0;
            text.push_str(&format!(
                "{:>9.2} {:>10.2} {:<6.2}\r\n",
                (280_000 + column) as f64,
                (5_660_999 - row) as f64,
                height
            ));
        }
    }
    text.into_bytes()
}

fn bench_parse_survey_256(c: &mut Criterion) {
    let size = 256;
    let text = survey_text(size);
    let format = SurveyFormat::default();

    c.bench_function("parse_survey_256", |b| {
        b.iter(|| {
            parse_survey(SurveyTileKey::new(280, 5660), black_box(text.as_slice()), size, &format)
        });
    });
}

fn bench_downsample_1024(c: &mut Criterion) {
    let size = 1024;
    let child: Vec<f32> = (0..size * size).map(|i| (i % 997) as f32).collect();

    c.bench_function("downsample_children_1024", |b| {
        b.iter(|| {
            let children = [Some(child.as_slice()); 4];
            downsample_children(black_box(size), children)
        });
    });
}

fn bench_assemble_1024(c: &mut Criterion) {
    let mapper = CoordinateMapper::new(1024, 1000, IVec2::new(-346_000, 5_675_000));
    let key = TileKey::new(3, 5, 0);
    let footprint = mapper.survey_footprint(key);
    let surveys: Vec<_> = footprint
        .iter()
        .map(|survey| {
            let heights = vec![survey.x as f32; 1000 * 1000];
            SurveyBuffer::from_heights(survey, 1000, heights).ok().map(Arc::new)
        })
        .collect();

    c.bench_function("assemble_from_surveys_1024", |b| {
        b.iter(|| assemble_from_surveys(&mapper, black_box(key), &footprint, &surveys));
    });
}

fn bench_priority_update(c: &mut Criterion) {
    let mapper = CoordinateMapper::new(1024, 1000, IVec2::new(-346_000, 5_675_000));
    let mut queue = TilePriorityQueue::new(32_768.0);

    c.bench_function("priority_queue_update", |b| {
        let mut frame = 0u32;
        b.iter(|| {
            frame += 1;
            let camera = Vec2::new((frame as f32 * 0.1).sin() * 500.0, (frame as f32 * 0.1).cos() * 500.0);
            queue.update(black_box(camera), &mapper, 2048.0, 4, |_| false);
            black_box(queue.len());
        });
    });
}

criterion_group!(
    benches,
    bench_parse_survey_256,
    bench_downsample_1024,
    bench_assemble_1024,
    bench_priority_update,
);
criterion_main!(benches);
