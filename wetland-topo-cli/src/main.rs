use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use wetland_topo::{
    store::load_domains, Context, DatasetRef, FieldKind, FieldNames, GdalStore, Outcome,
    ProjectStore, ValidationConfig, Workflow,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 判定ポリゴンのレイヤ (PATH または PATH::LAYER)
    #[arg(long, value_name = "DATASET")]
    collection: DatasetRef,

    /// 依頼範囲 (reference boundary) のレイヤ
    #[arg(long, value_name = "DATASET")]
    boundary: DatasetRef,

    /// 区画 (tract) 境界のレイヤ
    #[arg(long, value_name = "DATASET")]
    tract: DatasetRef,

    /// 列挙フィールドのドメイン表 (FIELD=PATH[::LAYER]、繰り返し指定)
    #[arg(long = "domain", value_name = "FIELD=DATASET", value_parser = parse_domain)]
    domains: Vec<(FieldKind, DatasetRef)>,

    /// 参照点 (ROP) のレイヤ
    #[arg(long, value_name = "DATASET")]
    rop: Option<DatasetRef>,
}

fn parse_domain(s: &str) -> std::result::Result<(FieldKind, DatasetRef), String> {
    let (field, target) = s
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=PATH[::LAYER], got '{}'", s))?;
    Ok((field.parse()?, target.parse()?))
}

fn main() -> Result<ExitCode> {
    // ログの初期化
    tracing_subscriber::fmt::init();

    // CLI引数の解析
    let args = Args::parse();

    // 処理開始時間を記録
    let start_time = std::time::Instant::now();

    let domains = load_domains(&args.domains)?;
    let ctx = Context::new(ValidationConfig::default());
    let mut store = GdalStore::new(
        args.collection,
        args.boundary,
        args.tract,
        FieldNames::default(),
    )
    .with_points(args.rop);

    info!("Validating project: {}", store.describe());
    let outcome = Workflow::new(&ctx, &domains).run(&mut store)?;

    let code = match outcome {
        Outcome::Pass(report) => {
            println!("PASS");
            println!(
                "  boundary: {} parts, {:.3} acres{}",
                report.boundary.parts.len(),
                report.acreage.total_boundary(),
                if report.reconciled { " (reconciled)" } else { "" }
            );
            println!(
                "  polygons: {} records, {:.3} acres",
                report.acreage.records.len(),
                report.acreage.total_records()
            );
            ExitCode::SUCCESS
        }
        Outcome::Fail(report) => {
            // 違反ジオメトリを表示用にスクラッチへ出力
            if let Some(violations) = &report.violations {
                match store.export_violations(violations) {
                    Ok(path) => info!("Written violations: {:?}", path),
                    Err(e) => error!("Failed to export violations: {}", e),
                }
            }
            println!("FAIL");
            println!("  stage: {}", report.stage);
            println!("  {}", report.diagnostic);
            for problem in report.attribute_problems.iter().skip(1) {
                println!("  {}", problem);
            }
            ExitCode::FAILURE
        }
    };

    // 処理時間を表示
    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);

    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_domain() {
        let (field, target) = parse_domain("three_factor=domains.gpkg::three_factor").unwrap();
        assert_eq!(field, FieldKind::ThreeFactor);
        assert_eq!(target, DatasetRef::new("domains.gpkg", Some("three_factor")));

        assert!(parse_domain("domains.gpkg").is_err());
        assert!(parse_domain("colour=domains.gpkg").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "wetland-topo",
            "--collection",
            "site.gdb::Site_CWD",
            "--boundary",
            "site.gdb::Request_Extent",
            "--tract",
            "site.gdb::Tract",
            "--domain",
            "eval_status=domains.gpkg::eval_status",
            "--domain",
            "wetland_label=domains.gpkg::labels",
        ])
        .unwrap();
        assert_eq!(args.domains.len(), 2);
        assert_eq!(args.collection.layer.as_deref(), Some("Site_CWD"));
        assert!(args.rop.is_none());
    }
}
