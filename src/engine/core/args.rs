use tracing::debug;

use super::types::AudioFormat;

/// Output file name: the input name with its last extension replaced by the
/// format's container extension
pub fn output_file_name(file_name: &str, format: AudioFormat) -> String {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    format!("{}.{}", stem, format.container_extension())
}

/// Build the encoder argument list for one input file
///
/// Order is fixed: input, bitrate, codec, output name.
pub fn build_arguments(file_name: &str, bit_rate_kbps: u32, format: AudioFormat) -> Vec<String> {
    vec![
        "-i".to_string(),
        file_name.to_string(),
        "-b:a".to_string(),
        format!("{}k", bit_rate_kbps),
        "-acodec".to_string(),
        format.codec().to_string(),
        output_file_name(file_name, format),
    ]
}

/// Render a program and its arguments as a copy-pasteable shell line
///
/// A part containing a NUL byte cannot be quoted for a shell; it is written
/// unquoted, so such a line is only fit for logging.
pub fn format_command<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(AsRef::as_ref))
        .map(quote_part)
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_part(part: &str) -> String {
    match shlex::try_quote(part) {
        Ok(quoted) => quoted.into_owned(),
        Err(e) => {
            debug!(part, "cannot shell-quote argument: {}", e);
            part.to_string()
        }
    }
}
