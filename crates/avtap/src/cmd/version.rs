use avtap::session::{AUDIO_MAX_FRAME_SIZE, VIDEO_MAX_FRAME_SIZE};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("avtap {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: avtap");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("AVTAP_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("video_max_frame_size: {VIDEO_MAX_FRAME_SIZE}");
    println!("audio_max_frame_size: {AUDIO_MAX_FRAME_SIZE}");

    Ok(SUCCESS)
}
