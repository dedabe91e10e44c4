use clap::{App, Arg, ArgMatches};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Stdout, Write};
use vmaf_combo::video::*;

fn main() -> Result<(), String> {
    let cli = App::new("VMAF Combo")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name("REFERENCE")
                .help("The reference video, Y4M or raw planar YUV")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("DISTORTED")
                .help("The distorted video to compare with the reference")
                .required(true)
                .index(2),
        )
        .arg(
            Arg::with_name("WIDTH")
                .help("Luma width, for raw YUV input")
                .long("width")
                .takes_value(true)
                .requires_all(&["HEIGHT", "FORMAT"]),
        )
        .arg(
            Arg::with_name("HEIGHT")
                .help("Luma height, for raw YUV input")
                .long("height")
                .takes_value(true)
                .requires_all(&["WIDTH", "FORMAT"]),
        )
        .arg(
            Arg::with_name("FORMAT")
                .help("Pixel format, for raw YUV input")
                .long("format")
                .takes_value(true)
                .requires_all(&["WIDTH", "HEIGHT"]),
        )
        .arg(
            Arg::with_name("METRIC")
                .help("Extract only these features, instead of all of them")
                .long("metric")
                .takes_value(true)
                .multiple(true)
                .possible_values(&["adm", "motion", "vif", "psnr", "ssim", "ms_ssim", "vmaf"]),
        )
        .arg(
            Arg::with_name("SERIES")
                .help("Extract these individual series, e.g. adm_num_scale0")
                .long("series")
                .takes_value(true)
                .multiple(true),
        )
        .arg(
            Arg::with_name("JSON")
                .help("Output the series as JSON--useful for piping to other programs")
                .long("export-json")
                .takes_value(true)
                .value_name("FILE"),
        )
        .arg(
            Arg::with_name("CSV")
                .help("Output the series as CSV, one row per frame")
                .long("export-csv")
                .takes_value(true)
                .value_name("FILE"),
        )
        .arg(
            Arg::with_name("QUIET")
                .help("Do not output to stdout")
                .long("quiet")
                .takes_value(false),
        )
        .arg(
            Arg::with_name("VERBOSE")
                .help("Log the run's progress to stderr")
                .long("verbose")
                .short("v")
                .takes_value(false),
        )
        .get_matches();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if cli.is_present("VERBOSE") {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // clap guarantees both positionals are present
    let reference = cli.value_of("REFERENCE").unwrap_or_default();
    let distorted = cli.value_of("DISTORTED").unwrap_or_default();

    let mut writers = vec![];
    if let Some(filename) = cli.value_of("JSON") {
        writers.push(OutputType::Json(BufWriter::new(
            File::create(filename).map_err(|err| err.to_string())?,
        )));
    };
    if let Some(filename) = cli.value_of("CSV") {
        writers.push(OutputType::Csv(BufWriter::new(
            File::create(filename).map_err(|err| err.to_string())?,
        )));
    };
    if !cli.is_present("QUIET") {
        writers.push(OutputType::Stdout(BufWriter::new(std::io::stdout())));
    }

    let mut series = select_series(&cli)?;
    let frames = run(reference, distorted, &cli, &mut series)?;

    let report = Report {
        reference,
        distorted,
        frames,
        series: &series,
    };
    for writer in writers.iter_mut() {
        report.print(writer)?;
        writer.flush().map_err(|err| err.to_string())?;
    }

    Ok(())
}

fn select_series(cli: &ArgMatches<'_>) -> Result<ComboSeries, String> {
    let metrics = cli.values_of("METRIC");
    let names = cli.values_of("SERIES");
    if metrics.is_none() && names.is_none() {
        return Ok(ComboSeries::all());
    }

    let mut series = ComboSeries::new();
    for metric in metrics.into_iter().flatten() {
        series = match metric {
            "adm" => series.with_adm(),
            "motion" => series.with_motion(),
            "vif" => series.with_vif(),
            "psnr" => series.with_psnr(),
            "ssim" => series.with_ssim(),
            "ms_ssim" => series.with_ms_ssim(),
            _ => series.with_adm().with_motion().with_vif(),
        };
    }
    for name in names.into_iter().flatten() {
        if !series.enable(name) {
            return Err(format!("Unknown series {}", name));
        }
    }
    Ok(series)
}

fn open(path: &str) -> Result<BufReader<File>, String> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|err| format!("Failed to open {}: {}", path, err))
}

fn run(
    reference: &str,
    distorted: &str,
    cli: &ArgMatches<'_>,
    series: &mut ComboSeries,
) -> Result<usize, String> {
    let progress = if cli.is_present("QUIET") || !console::user_attended() {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
            .with_style(ProgressStyle::default_spinner().template("{prefix} - Frame {pos}"))
    };
    progress.set_prefix("Extracting features");

    let frames = if let Some(format) = cli.value_of("FORMAT") {
        let width = parse_dimension(cli, "WIDTH")?;
        let height = parse_dimension(cli, "HEIGHT")?;
        let format: PixelFormat = format.parse().map_err(|err: vmaf_combo::ComboError| err.to_string())?;
        let config = ComboConfig::with_format(width, height, format).map_err(|err| err.to_string())?;
        let source = RawYuvSource::new(open(reference)?, open(distorted)?, width, height, format)
            .map_err(|err| err.to_string())?;
        extract(config, source, series, &progress)
    } else {
        let source = Y4mSource::new(open(reference)?, open(distorted)?).map_err(|err| err.to_string())?;
        let config = ComboConfig::with_format(source.width(), source.height(), source.format())
            .map_err(|err| err.to_string())?;
        extract(config, source, series, &progress)
    };
    progress.finish_and_clear();
    frames
}

fn parse_dimension(cli: &ArgMatches<'_>, name: &str) -> Result<usize, String> {
    let value = cli.value_of(name).unwrap_or_default();
    value
        .parse()
        .map_err(|_| format!("Invalid {} {}", name.to_lowercase(), value))
}

fn extract<S: FrameSource>(
    config: ComboConfig,
    source: S,
    series: &mut ComboSeries,
    progress: &ProgressBar,
) -> Result<usize, String> {
    Combo::new(config)
        .with_progress(|frameno| progress.set_position(frameno as u64))
        .run(source, NativeFeatures::new(config.cpu()), series)
        .map_err(|err| err.to_string())
}

#[derive(Debug, Serialize)]
struct Report<'s> {
    reference: &'s str,
    distorted: &'s str,
    frames: usize,
    series: &'s ComboSeries,
}

impl Report<'_> {
    fn print(&self, writer: &mut OutputType) -> Result<(), String> {
        match writer {
            OutputType::Json(w) => {
                let json = serde_json::to_string(&self).map_err(|err| err.to_string())?;
                writeln!(w, "{}", json).map_err(|err| err.to_string())?;
            }
            OutputType::Csv(w) => {
                let names: Vec<_> = self.series.iter().map(|(name, _)| name).collect();
                writeln!(w, "frame,{}", names.join(",")).map_err(|err| err.to_string())?;
                for frame in 0..self.frames {
                    let row: Vec<_> = self
                        .series
                        .iter()
                        .map(|(_, values)| values.get(frame).map(|v| v.to_string()).unwrap_or_default())
                        .collect();
                    writeln!(w, "{},{}", frame, row.join(",")).map_err(|err| err.to_string())?;
                }
            }
            OutputType::Stdout(_) => {
                writeln!(
                    writer,
                    "Comparing {} with {}: {} frames\n",
                    style(self.reference).italic().cyan(),
                    style(self.distorted).italic().cyan(),
                    self.frames
                )
                .map_err(|err| err.to_string())?;
                for (name, values) in self.series.iter() {
                    write!(writer, "     {:<16} →", style(name).cyan()).map_err(|err| err.to_string())?;
                    for value in values.iter() {
                        write!(writer, " {:<8.4}", value).map_err(|err| err.to_string())?;
                    }
                    writeln!(writer).map_err(|err| err.to_string())?;
                }
            }
        }

        Ok(())
    }
}

enum OutputType {
    Json(BufWriter<File>),
    Csv(BufWriter<File>),
    Stdout(BufWriter<Stdout>),
}

impl Write for OutputType {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            OutputType::Json(f) | OutputType::Csv(f) => f.write(buf),
            OutputType::Stdout(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            OutputType::Json(f) | OutputType::Csv(f) => f.flush(),
            OutputType::Stdout(s) => s.flush(),
        }
    }
}
