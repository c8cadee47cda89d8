use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use detector::{
    ClassNames,
    processing::{TransformParams, post::PostProcessor, pre::PreProcessor},
};
use image::{Rgb, RgbImage};
use ndarray::{Array, IxDyn};

const NUM_ANCHORS: usize = 8400;
const NUM_CLASSES: usize = 80;

/// Create mock YOLO output `[1, 84, 8400]` with N confident, partly overlapping boxes
fn create_mock_yolo_output(num_detections: usize) -> Array<f32, IxDyn> {
    let features = 4 + NUM_CLASSES;
    let mut data = vec![0.001f32; features * NUM_ANCHORS];

    for i in 0..num_detections.min(NUM_ANCHORS) {
        data[i] = 40.0 + (i % 30) as f32 * 20.0;
        data[NUM_ANCHORS + i] = 40.0 + (i / 30) as f32 * 20.0;
        data[2 * NUM_ANCHORS + i] = 60.0;
        data[3 * NUM_ANCHORS + i] = 60.0;
        data[(4 + i % NUM_CLASSES) * NUM_ANCHORS + i] = 0.9;
    }

    Array::from_shape_vec(IxDyn(&[1, features, NUM_ANCHORS]), data).unwrap()
}

fn benchmark_preprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("preprocessing");

    let resolutions = [(640, 480), (1280, 720), (1920, 1080)];
    let preprocessor = PreProcessor::new(640);

    for (width, height) in resolutions.iter() {
        let image = RgbImage::from_pixel(*width, *height, Rgb([128, 128, 128]));

        group.bench_with_input(
            BenchmarkId::new("letterbox", format!("{}x{}", width, height)),
            &image,
            |b, image| b.iter(|| preprocessor.preprocess(black_box(image)).unwrap()),
        );
    }

    group.finish();
}

fn benchmark_postprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("postprocessing");

    let postprocessor = PostProcessor::new(0.25, 0.45, 300);
    let names = ClassNames::default();
    let transform = TransformParams {
        orig_width: 1280,
        orig_height: 720,
        input_size: 640,
        scale: 0.5,
        offset_x: 0.0,
        offset_y: 140.0,
    };

    for num_detections in [0usize, 10, 100, 500] {
        let output = create_mock_yolo_output(num_detections);

        group.bench_with_input(
            BenchmarkId::new("decode_nms", num_detections),
            &output,
            |b, output| {
                b.iter(|| {
                    postprocessor
                        .parse_detections(black_box(&output.view()), &transform, &names)
                        .unwrap()
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_preprocessing, benchmark_postprocessing);
criterion_main!(benches);
