use std::{env, io, process::ExitCode};

use dicom_codec::{dicom, pixel_data, util, CodecRegistry, CommonResult, ParseOptions};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: dicom_codec <file.dcm> [out.png]";

fn run(file_path: &str, png_path: Option<&str>) -> CommonResult<()> {
    // 超过 64KB 的值在需要时才从文件中读取
    let options = ParseOptions::default().with_lazy_load_threshold(64 * 1024);
    let dataset = dicom::parse_file(file_path, &options)?;

    let stdout = io::stdout();
    util::dump_dataset(&dataset, &mut stdout.lock())?;

    let frames = dataset.frame_count();
    tracing::info!(frames, "parsed {}", file_path);

    // 生成第一帧的图像
    if let Some(png_path) = png_path {
        if frames == 0 {
            tracing::warn!("{} has no pixel data, nothing to export", file_path);
            return Ok(());
        }
        let registry = CodecRegistry::with_defaults();
        let frame = pixel_data::decode_frame(&dataset, 0, &registry)?;
        frame.save_png(png_path)?;
        tracing::info!(
            width = frame.width,
            height = frame.height,
            "frame 0 saved to {}",
            png_path
        );
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = env::args().skip(1).collect::<Vec<String>>();
    let (file_path, png_path) = match args.as_slice() {
        [file] => (file.as_str(), None),
        [file, png] => (file.as_str(), Some(png.as_str())),
        _ => {
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
    };

    match run(file_path, png_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("{}", error);
            ExitCode::FAILURE
        }
    }
}
