// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use log::info;
use std::{env, error::Error, path::PathBuf, sync::Arc};

use stereo_odometry_rs::core::backend::Backend;
use stereo_odometry_rs::core::map::Map;
use stereo_odometry_rs::core::track::frontend::{Config, Frontend, Status};
use stereo_odometry_rs::dataset::kitti;

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if let Err(error) = my_run(&args) {
        eprintln!("{}", error);
    }
}

const USAGE: &str = "Usage: ./sors_track kitti_sequence_dir [config.toml]";

fn my_run(args: &[String]) -> Result<(), Box<dyn Error>> {
    // Check that the arguments are correct.
    let valid_args = check_args(args)?;

    // Load the tracking configuration, if any.
    let config = match &valid_args.config_file_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    // Read calibration and timestamps of the sequence.
    let sequence = kitti::Sequence::open(&valid_args.sequence_dir)?;
    info!(
        "Sequence of {} frames, stereo baseline {:.3}",
        sequence.len(),
        sequence.rig.baseline()
    );

    // Setup the shared map, the backend thread and the frontend.
    let map = Arc::new(Map::new());
    let backend = Arc::new(Backend::spawn(map.clone(), |map: &Map| {
        info!(
            "Map has {} keyframes and {} landmarks",
            map.nb_keyframes(),
            map.nb_landmarks()
        );
    }));
    let mut frontend = Frontend::new(config, sequence.rig.clone(), map.clone());
    frontend.set_backend(backend.clone());

    // Track every frame of the sequence.
    for index in 0..sequence.len() {
        let frame = sequence.read_frame(index)?;
        let status = frontend.add_frame(frame);
        if status == Status::Initing {
            info!("Frame {} not initialized, printing its seeded pose", index);
        }

        // Print to stdout the frame pose, one line per frame.
        if let Some(last) = frontend.last_frame() {
            let pose = last.read().pose();
            println!("{}", kitti::TrajectoryPose { pose });
        }
    }

    backend.stop();
    info!(
        "Done after {} backend passes, {} keyframes, {} landmarks",
        backend.nb_passes(),
        map.nb_keyframes(),
        map.nb_landmarks()
    );
    Ok(())
}

struct Args {
    sequence_dir: PathBuf,
    config_file_path: Option<PathBuf>,
}

/// Verify that command line arguments are correct.
fn check_args(args: &[String]) -> Result<Args, String> {
    let (sequence_dir_str, config_str) = match args {
        [_, sequence_dir] => (sequence_dir, None),
        [_, sequence_dir, config] => (sequence_dir, Some(config)),
        _ => {
            eprintln!("{}", USAGE);
            return Err("Wrong number of arguments".to_string());
        }
    };
    let sequence_dir = PathBuf::from(sequence_dir_str);
    if !sequence_dir.is_dir() {
        eprintln!("{}", USAGE);
        return Err(format!(
            "The sequence directory does not exist or is not reachable: {}",
            sequence_dir_str
        ));
    }
    let config_file_path = config_str.map(PathBuf::from);
    if let Some(path) = &config_file_path {
        if !path.is_file() {
            return Err(format!(
                "The configuration file does not exist or is not reachable: {}",
                path.display()
            ));
        }
    }
    Ok(Args {
        sequence_dir,
        config_file_path,
    })
}
