use dfdx::prelude::*;

use clap::Parser;
use plotters::prelude::*;
use rand::Rng;

use xor_mlp::minibatch::{StreamDef, TextFormatSource};
use xor_mlp::mlp::{Trainer, XorMlpConfig, INPUT_DIM};
use xor_mlp::plots::plot_loss_curve;

const FEATURES_STREAM: StreamDef<'static> = StreamDef {
    name: "features",
    dim: INPUT_DIM,
};

const LABELS_STREAM: StreamDef<'static> = StreamDef {
    name: "labels",
    dim: 1,
};

const MINIBATCH_SIZE: usize = 4;

const XOR_FEATURES: [f32; 8] = [0., 0., 0., 1., 1., 0., 1., 1.];
const XOR_LABELS: [f32; 4] = [0., 1., 1., 0.];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "data/xor_dataset.txt")]
    dataset_path: String,

    /// "file" trains from the dataset file, "array" from the in-memory
    /// truth table.
    #[arg(long, default_value = "file")]
    source: String,

    /// Number of full sweeps over the dataset.
    #[arg(long, default_value_t = 1000)]
    epochs: usize,

    #[arg(long, default_value_t = 0.1)]
    lr: f64,

    /// Progress is printed every this many minibatches.
    #[arg(long, default_value_t = 50)]
    output_frequency: usize,

    #[arg(long)]
    model_path: Option<String>,

    #[arg(long)]
    plot_path: Option<String>,

    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let seed = args
        .seed
        .unwrap_or_else(|| rand::thread_rng().gen_range(0..10000));

    let dev = AutoDevice::seed_from_u64(seed);

    println!("Device: {:?}, seed: {}", dev, seed);

    let model = dev.build_module::<f32>(XorMlpConfig::default());

    let mut trainer = Trainer::new(
        model,
        SgdConfig {
            lr: args.lr,
            momentum: None,
            weight_decay: None,
        },
    );

    let mut source = match args.source.as_str() {
        "file" => TextFormatSource::from_file(&args.dataset_path, FEATURES_STREAM, LABELS_STREAM)?,
        "array" => TextFormatSource::from_rows(&XOR_FEATURES, &XOR_LABELS, INPUT_DIM, 1)?,
        other => return Err(format!("unknown source: {}", other).into()),
    };

    println!("Start training ({})...", args.source);

    let losses = run_training(
        &mut trainer,
        &mut source,
        &dev,
        args.epochs,
        args.output_frequency,
    )?;

    println!("End training...");

    let model_path = args
        .model_path
        .unwrap_or_else(|| "models/xor_mlp".to_string());
    create_parent_dirs(&model_path)?;
    trainer.model().save_safetensors(&model_path)?;

    let plot_path = args
        .plot_path
        .unwrap_or_else(|| "plots/xor_loss.svg".to_string());
    create_parent_dirs(&plot_path)?;

    let svg_backend = SVGBackend::new(&plot_path, (1024, 768)).into_drawing_area();
    plot_loss_curve(&losses, &svg_backend)?;
    svg_backend.present()?;

    predict(&trainer, &dev)?;

    Ok(())
}

/// Trains until `epochs` sweeps over the dataset have completed and returns
/// the loss of every minibatch.
fn run_training<M, D>(
    trainer: &mut Trainer<M, f32, D>,
    source: &mut TextFormatSource<f32>,
    dev: &D,
    epochs: usize,
    output_frequency: usize,
) -> Result<Vec<f32>, Box<dyn std::error::Error>>
where
    D: Device<f32>,
    M: Module<
        Tensor<(usize, Const<INPUT_DIM>), f32, D, OwnedTape<f32, D>>,
        Output = Tensor<(usize, Const<1>), f32, D, OwnedTape<f32, D>>,
    >,
    M: Module<
        Tensor<(usize, Const<INPUT_DIM>), f32, D, NoneTape>,
        Output = Tensor<(usize, Const<1>), f32, D, NoneTape>,
    >,
    M: UpdateParams<f32, D>,
{
    let mut losses = Vec::new();
    let mut remaining = epochs;
    let mut minibatch_idx = 0;

    while remaining > 0 {
        let minibatch = source.next_minibatch::<_, INPUT_DIM, 1>(MINIBATCH_SIZE, dev)?;
        let sweep_end = minibatch.sweep_end;

        let stats = trainer.train_minibatch(minibatch.features, minibatch.labels)?;
        losses.push(stats.loss);

        trainer.print_progress(minibatch_idx, output_frequency);
        minibatch_idx += 1;

        if sweep_end {
            remaining -= 1;
        }
    }

    Ok(losses)
}

/// Evaluates the four XOR rows and prints the rounded prediction next to
/// the raw probability.
fn predict<M, D>(trainer: &Trainer<M, f32, D>, dev: &D) -> Result<(), Box<dyn std::error::Error>>
where
    D: Device<f32>,
    M: Module<
        Tensor<(usize, Const<INPUT_DIM>), f32, D, OwnedTape<f32, D>>,
        Output = Tensor<(usize, Const<1>), f32, D, OwnedTape<f32, D>>,
    >,
    M: Module<
        Tensor<(usize, Const<INPUT_DIM>), f32, D, NoneTape>,
        Output = Tensor<(usize, Const<1>), f32, D, NoneTape>,
    >,
    M: UpdateParams<f32, D>,
{
    println!("Prediction");

    let features = dev.tensor_from_vec(XOR_FEATURES.to_vec(), (4, Const::<INPUT_DIM>::default()));

    let probs = trainer.predict(features)?.as_vec();

    for (query, prob) in XOR_FEATURES.chunks_exact(INPUT_DIM).zip(probs) {
        println!(
            "[{} {}] = {} ~ {:.6}",
            query[0] as u8, query[1] as u8, prob.round() as u8, prob
        );
    }

    Ok(())
}

fn create_parent_dirs(path: &str) -> Result<(), std::io::Error> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    Ok(())
}
