use basis_select::basis::{PolynomialFamily, total_degree_basis};
use basis_select::selection::{
    ApproximationAlgorithm, ApproximationResult, LeastSquaresFit, LeastSquaresMetaModelSelection,
};
use basis_select::types::{CrossValidationMethod, LeastSquaresStrategy, SelectionConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use csv::{ReaderBuilder, StringRecord};
use ndarray::{Array1, Array2, Axis};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "basis-select")]
#[command(about = "Sparse polynomial metamodels by least angle regression", long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select a sparse polynomial basis for one column of a CSV file.
    #[command(alias = "train")]
    Fit(FitArgs),
    /// Print the configuration after defaults and overrides are applied.
    Describe(DescribeArgs),
}

#[derive(Args, Debug, Clone)]
struct OverrideArgs {
    /// JSON file with selection options (kebab-case keys).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    #[arg(long = "strategy", value_enum)]
    strategy: Option<StrategyArg>,
    #[arg(long = "cv", value_enum)]
    cv: Option<CvArg>,
    /// Number of folds for --cv kfold.
    #[arg(long = "folds")]
    folds: Option<usize>,
    #[arg(long = "max-relative-convergence")]
    max_relative_convergence: Option<f64>,
}

#[derive(Args, Debug)]
struct FitArgs {
    data: PathBuf,
    #[arg(long = "target")]
    target: String,
    /// Comma-separated input columns; defaults to every other column.
    #[arg(long = "features")]
    features: Option<String>,
    /// Column holding per-row weights.
    #[arg(long = "weights")]
    weights: Option<String>,
    /// Total degree of the polynomial dictionary.
    #[arg(long = "degree", default_value_t = 3)]
    degree: usize,
    #[arg(long = "family", value_enum, default_value_t = FamilyArg::Legendre)]
    family: FamilyArg,
    /// Fit every candidate without selection.
    #[arg(long = "no-selection", default_value_t = false)]
    no_selection: bool,
    #[command(flatten)]
    overrides: OverrideArgs,
    #[arg(long = "out")]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DescribeArgs {
    #[command(flatten)]
    overrides: OverrideArgs,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum FamilyArg {
    Monomial,
    Legendre,
    Hermite,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum StrategyArg {
    Cholesky,
    Qr,
    Svd,
    Sparse,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum CvArg {
    Loo,
    Kfold,
}

struct Dataset {
    headers: Vec<String>,
    values: Array2<f64>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    match cli.command {
        Command::Fit(args) => run_fit(args),
        Command::Describe(args) => run_describe(args),
    }
}

fn run_fit(args: FitArgs) -> Result<(), String> {
    let config = resolve_config(&args.overrides)?;
    let ds = load_dataset(&args.data)?;
    let col_map: HashMap<&str, usize> = ds
        .headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.as_str(), i))
        .collect();
    let lookup = |name: &str| {
        col_map
            .get(name)
            .copied()
            .ok_or_else(|| format!("column '{name}' not found"))
    };

    let y_col = lookup(&args.target)?;
    let weight_col = args.weights.as_deref().map(lookup).transpose()?;
    let feature_cols: Vec<usize> = match &args.features {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(lookup)
            .collect::<Result<_, _>>()?,
        None => (0..ds.headers.len())
            .filter(|&j| j != y_col && Some(j) != weight_col)
            .collect(),
    };
    if feature_cols.is_empty() {
        return Err("no feature columns selected".to_string());
    }

    let x = ds.values.select(Axis(1), &feature_cols);
    let y: Array1<f64> = ds.values.column(y_col).to_owned();
    let family = match args.family {
        FamilyArg::Monomial => PolynomialFamily::Monomial,
        FamilyArg::Legendre => PolynomialFamily::Legendre,
        FamilyArg::Hermite => PolynomialFamily::Hermite,
    };
    let basis = total_degree_basis(feature_cols.len(), args.degree, family);
    eprintln!(
        "{} rows, {} inputs, {} candidate basis functions ({:?}, degree {})",
        x.nrows(),
        x.ncols(),
        basis.len(),
        family,
        args.degree
    );

    let weights = weight_col.map(|j| ds.values.column(j).to_owned());
    let result: ApproximationResult = if args.no_selection {
        let mut algo =
            LeastSquaresFit::new(x, y, basis, config).map_err(|e| e.to_string())?;
        if let Some(w) = weights {
            algo = algo.with_weights(w);
        }
        algo.run().map_err(|e| e.to_string())?
    } else {
        let mut algo = LeastSquaresMetaModelSelection::new(x, y, basis, config)
            .map_err(|e| e.to_string())?;
        if let Some(w) = weights {
            algo = algo.with_weights(w);
        }
        algo.run().map_err(|e| e.to_string())?
    };

    for (label, coefficient) in result.labels.iter().zip(result.coefficients.iter()) {
        println!("{coefficient:>14.6e}  {label}");
    }
    println!(
        "residual {:.6e}, relative error {:.6e}",
        result.residual, result.relative_error
    );

    if let Some(out) = args.out {
        let json = serde_json::to_string_pretty(&result)
            .map_err(|e| format!("failed to serialize result: {e}"))?;
        fs::write(&out, json)
            .map_err(|e| format!("failed to write '{}': {e}", out.display()))?;
        eprintln!("wrote {}", out.display());
    }
    Ok(())
}

fn run_describe(args: DescribeArgs) -> Result<(), String> {
    let config = resolve_config(&args.overrides)?;
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| format!("failed to serialize config: {e}"))?;
    println!("{json}");
    Ok(())
}

fn resolve_config(args: &OverrideArgs) -> Result<SelectionConfig, String> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("failed to read config '{}': {e}", path.display()))?;
            serde_json::from_str::<SelectionConfig>(&text)
                .map_err(|e| format!("invalid config '{}': {e}", path.display()))?
        }
        None => SelectionConfig::default(),
    };
    if let Some(strategy) = args.strategy {
        config.strategy = match strategy {
            StrategyArg::Cholesky => LeastSquaresStrategy::Cholesky,
            StrategyArg::Qr => LeastSquaresStrategy::QR,
            StrategyArg::Svd => LeastSquaresStrategy::SVD,
            StrategyArg::Sparse => LeastSquaresStrategy::Sparse,
        };
    }
    if let Some(cv) = args.cv {
        config.cross_validation = match cv {
            CvArg::Loo => CrossValidationMethod::CorrectedLeaveOneOut,
            CvArg::Kfold => CrossValidationMethod::KFold,
        };
    }
    if let Some(folds) = args.folds {
        config.fold_count = folds;
    }
    if let Some(threshold) = args.max_relative_convergence {
        config.maximum_relative_convergence = threshold;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn load_dataset(path: &Path) -> Result<Dataset, String> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| format!("failed to open csv '{}': {e}", path.display()))?;

    let headers = rdr
        .headers()
        .map_err(|e| format!("failed to read csv headers: {e}"))?
        .iter()
        .map(|s| s.trim().to_string())
        .collect::<Vec<_>>();
    if headers.is_empty() {
        return Err("csv has no headers".to_string());
    }

    let mut records = Vec::<StringRecord>::new();
    for rec in rdr.records() {
        let record = rec.map_err(|e| format!("failed reading csv row: {e}"))?;
        if record.len() != headers.len() {
            return Err(format!(
                "csv row width mismatch: got {} fields, expected {}",
                record.len(),
                headers.len()
            ));
        }
        records.push(record);
    }
    if records.is_empty() {
        return Err("csv has no rows".to_string());
    }

    let mut values = Array2::<f64>::zeros((records.len(), headers.len()));
    for (i, rec) in records.iter().enumerate() {
        for (j, raw) in rec.iter().enumerate() {
            let value = raw.trim().parse::<f64>().map_err(|_| {
                format!(
                    "non-numeric value '{}' at row {}, column '{}'",
                    raw.trim(),
                    i + 1,
                    headers[j]
                )
            })?;
            if !value.is_finite() {
                return Err(format!(
                    "non-finite value at row {}, column '{}'",
                    i + 1,
                    headers[j]
                ));
            }
            values[[i, j]] = value;
        }
    }
    Ok(Dataset { headers, values })
}
