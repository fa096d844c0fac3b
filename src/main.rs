use std::{env, process::ExitCode};

use dicom_reslice::{
    enums::{Interpolation, Orientation, Processor, QualityTier},
    volume_loader::{LoaderOptions, VolumeLoader},
    window::Window,
};

const USAGE: &str = "usage: dicom-reslice <archive.zip> [threshold] [coarse|medium|fine]";

fn main() -> ExitCode {
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .try_init();

    let mut args = env::args().skip(1);
    let Some(archive) = args.next() else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };
    let threshold: Option<f32> = match args.next().map(|arg| arg.parse()) {
        Some(Ok(threshold)) => Some(threshold),
        Some(Err(err)) => {
            eprintln!("invalid threshold: {err}\n{USAGE}");
            return ExitCode::FAILURE;
        }
        None => None,
    };
    let quality = match args.next().map(|arg| arg.parse::<QualityTier>()) {
        Some(Ok(quality)) => quality,
        Some(Err(err)) => {
            eprintln!("{err}\n{USAGE}");
            return ExitCode::FAILURE;
        }
        None => QualityTier::default(),
    };

    let volume = match VolumeLoader::load_from_path(&archive, &LoaderOptions::default()) {
        Ok(volume) => volume,
        Err(err) if err.is_no_volume() => {
            eprintln!("{archive}: archive read, but it holds no image slices with a 3D position");
            return ExitCode::FAILURE;
        }
        Err(err) => {
            eprintln!("{archive}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let descriptor = volume.descriptor();
    println!("Patient:    {}", descriptor.patient_name);
    println!("Slices:     {}", descriptor.slice_count);
    println!("Dimensions: {} x {}", descriptor.rows, descriptor.columns);
    println!("Spacing:    {:?}", descriptor.spacing);

    let (min, max) = volume.value_range();
    let window = Window::new(min, max);
    for orientation in Orientation::ALL {
        let index = volume.extent(orientation) / 2;
        let image = volume.get_image_from_axis(
            index,
            orientation,
            window,
            Interpolation::Bilinear(Processor::CPU),
        );
        let path = format!("{orientation}.png");
        match image.map(|image| image.save(&path)) {
            Ok(Ok(())) => println!("Wrote {path}"),
            Ok(Err(err)) => eprintln!("{path}: {err}"),
            Err(err) => eprintln!("{orientation}: {err}"),
        }
    }

    let threshold = threshold.unwrap_or((min + max) / 2.0);
    match volume.extract_mesh_with_quality(threshold, quality) {
        Ok(mesh) if mesh.is_empty() => println!("No surface at {threshold}"),
        Ok(mesh) => println!(
            "Surface at {threshold}: {} vertices, {} faces",
            mesh.vertex_count(),
            mesh.face_count()
        ),
        Err(err) => eprintln!("Mesh generation failed: {err}"),
    }

    ExitCode::SUCCESS
}
