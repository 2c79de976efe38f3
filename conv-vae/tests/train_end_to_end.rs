use candle_util::candle_data_loader::InMemoryData;
use clap::Parser;
use conv_vae::fit_conv_vae::{train_conv_vae, ConvVaeArgs};
use std::fs;
use std::path::Path;

fn synthetic_rows(n: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|i| {
            (0..784)
                .map(|j| if (j / 28 + i) % 3 == 0 { 1.0 } else { 0.0 })
                .collect()
        })
        .collect()
}

fn args_for(dir: &Path, batch_size: usize, max_epoch: usize, extra: &[&str]) -> ConvVaeArgs {
    let wd = dir.to_string_lossy().to_string();
    let batch_size = batch_size.to_string();
    let max_epoch = max_epoch.to_string();
    let mut argv = vec![
        "conv-vae",
        "--batch-size",
        batch_size.as_str(),
        "--updates-per-epoch",
        "2",
        "--max-epoch",
        max_epoch.as_str(),
        "--quiet",
        "--working-directory",
        wd.as_str(),
    ];
    argv.extend_from_slice(extra);
    ConvVaeArgs::try_parse_from(argv).expect("valid arguments")
}

fn png_names(img_dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = fs::read_dir(img_dir)?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().to_string()))
        .collect::<std::io::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}

#[test]
fn defaults_match_the_training_script() {
    let args = ConvVaeArgs::try_parse_from(["conv-vae"]).expect("defaults");
    assert_eq!(args.batch_size, 128);
    assert_eq!(args.updates_per_epoch, 1000);
    assert_eq!(args.max_epoch, 100);
    assert_eq!(args.learning_rate, 0.01);
    assert_eq!(args.working_directory.as_ref(), "");
    assert_eq!(args.hidden_size, 10);
    assert_eq!(args.seed, 42);
    assert_eq!(args.data_directory(), Path::new("data/mnist"));
    assert_eq!(args.image_directory(), Path::new("img"));
}

#[test]
fn one_epoch_on_two_examples_writes_a_batch_of_images() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let args = args_for(dir.path(), 4, 1, &[]);
    let train_config = args.train_config()?;

    let mut data = InMemoryData::new(&synthetic_rows(2))?;
    let trace = train_conv_vae(&args, &mut data, &train_config)?;

    assert_eq!(trace.len(), 1);
    assert!(trace[0].is_finite());

    let names = png_names(&args.image_directory())?;
    assert_eq!(names, vec!["0.png", "1.png", "2.png", "3.png"]);

    let img = image::open(args.image_directory().join("3.png"))?.to_luma8();
    assert_eq!(img.dimensions(), (28, 28));
    Ok(())
}

#[test]
fn later_epochs_overwrite_the_same_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let args = args_for(dir.path(), 3, 2, &[]);
    let train_config = args.train_config()?;

    let mut data = InMemoryData::new(&synthetic_rows(5))?;
    let trace = train_conv_vae(&args, &mut data, &train_config)?;

    assert_eq!(trace.len(), 2);
    assert!(trace.iter().all(|b| b.is_finite()));
    assert_eq!(png_names(&args.image_directory())?.len(), 3);
    Ok(())
}

#[test]
fn zero_epochs_write_nothing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let args = args_for(dir.path(), 4, 0, &[]);

    let mut data = InMemoryData::new(&synthetic_rows(2))?;
    let trace = train_conv_vae(&args, &mut data, &args.train_config()?)?;
    assert!(trace.is_empty());
    assert!(!args.image_directory().exists());
    Ok(())
}

#[test]
fn zero_hidden_size_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let args = args_for(dir.path(), 4, 1, &["--hidden-size", "0"]);
    let mut data = InMemoryData::new(&synthetic_rows(2))?;
    assert!(train_conv_vae(&args, &mut data, &args.train_config()?).is_err());
    Ok(())
}
