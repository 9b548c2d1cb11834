use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{new_table, print_json, OutputFormat};

#[derive(Serialize)]
struct VersionOutput {
    name: &'static str,
    version: &'static str,
    build_target: &'static str,
    build_profile: &'static str,
    git_hash: &'static str,
    os: &'static str,
    arch: &'static str,
    async_codec: bool,
    defaults: Defaults,
}

#[derive(Serialize)]
struct Defaults {
    buffer_capacity: usize,
    max_frame_size: usize,
    timelog_path: &'static str,
}

impl VersionOutput {
    fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            build_target: option_env!("RDASTREAM_BUILD_TARGET").unwrap_or("unknown"),
            build_profile: option_env!("RDASTREAM_BUILD_PROFILE").unwrap_or("unknown"),
            git_hash: option_env!("RDASTREAM_GIT_HASH").unwrap_or("unknown"),
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            async_codec: cfg!(feature = "async"),
            defaults: Defaults {
                buffer_capacity: rdastream_client::DEFAULT_BUFFER_CAPACITY,
                max_frame_size: rdastream_frame::DEFAULT_MAX_FRAME_SIZE,
                timelog_path: rdastream_client::DEFAULT_TIMELOG_PATH,
            },
        }
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("version", self.version.to_string()),
            ("build target", self.build_target.to_string()),
            ("build profile", self.build_profile.to_string()),
            ("git hash", self.git_hash.to_string()),
            ("platform", format!("{}/{}", self.os, self.arch)),
            ("async codec", self.async_codec.to_string()),
            ("buffer capacity", self.defaults.buffer_capacity.to_string()),
            ("max frame size", self.defaults.max_frame_size.to_string()),
            ("time log path", self.defaults.timelog_path.to_string()),
        ]
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    let out = VersionOutput::current();
    if !args.extended {
        println!("{} {}", out.name, out.version);
        return Ok(SUCCESS);
    }

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["FIELD", "VALUE"]);
            for (field, value) in out.fields() {
                table.add_row(vec![field.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{} {}", out.name, out.version);
            for (field, value) in out.fields().into_iter().skip(1) {
                println!("  {field:<16} {value}");
            }
        }
    }
    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_fields_carry_client_defaults() {
        let out = VersionOutput::current();
        assert_eq!(out.name, "rdastream");
        let fields = out.fields();
        assert_eq!(fields[0], ("version", env!("CARGO_PKG_VERSION").to_string()));
        assert!(fields.iter().any(|(field, value)| *field == "buffer capacity"
            && *value == rdastream_client::DEFAULT_BUFFER_CAPACITY.to_string()));
    }

    #[test]
    fn json_output_nests_defaults() {
        let value = serde_json::to_value(VersionOutput::current()).unwrap();
        assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(
            value["defaults"]["max_frame_size"],
            rdastream_frame::DEFAULT_MAX_FRAME_SIZE
        );
    }
}
