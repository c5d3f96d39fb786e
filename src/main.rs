use anyhow::Context;
use clap::Parser;
use post_fire_analytics::config::cli::{
    Cli, Command, GediAction, GediArgs, PreprocessArgs, RunArgs, S1Action, S1QueryArgs,
};
use post_fire_analytics::utils::error::{AnalyticsError, ErrorSeverity};
use post_fire_analytics::utils::{logger, validation::Validate};
use post_fire_analytics::{
    AnalyticsEngine, FirePipeline, GediClient, LocalStorage, RunConfig, Sentinel1Preprocessor,
    Sentinel1Query,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    tracing::debug!("CLI arguments: {:?}", cli);

    if let Err(e) = run(cli.command).await {
        std::process::exit(report(&e));
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Gedi { action } => gedi(action).await,
        Command::S1 {
            action: S1Action::Query(args),
        } => s1_query(args).await,
        Command::Preprocess(args) => preprocess(args).await,
        Command::Run(args) => run_pipeline(args).await,
    }
}

fn gedi_client(args: &GediArgs) -> GediClient {
    let client = GediClient::new(args.product);
    match &args.endpoint {
        Some(endpoint) => client.with_endpoint(endpoint.clone()),
        None => client,
    }
}

async fn gedi(action: GediAction) -> anyhow::Result<()> {
    match action {
        GediAction::Count(args) => {
            args.validate()?;
            let bbox = args.area.bounds()?;
            let range = args.range()?;
            let count = gedi_client(&args).get_granule_count(&bbox, &range).await?;
            println!("{}", count);
        }
        GediAction::Urls {
            query,
            max_results,
            output,
        } => {
            query.validate()?;
            let bbox = query.area.bounds()?;
            let range = query.range()?;
            let urls = gedi_client(&query)
                .get_download_urls(&bbox, &range, max_results)
                .await?;

            match output {
                Some(path) => {
                    let mut listing = urls.join("\n");
                    listing.push('\n');
                    std::fs::write(&path, listing)
                        .with_context(|| format!("writing URL list to {}", path.display()))?;
                    println!("📁 {} URLs written to {}", urls.len(), path.display());
                }
                None => urls.iter().for_each(|url| println!("{}", url)),
            }
        }
    }
    Ok(())
}

async fn s1_query(args: S1QueryArgs) -> anyhow::Result<()> {
    args.validate()?;
    let query = Sentinel1Query::new(args.credentials(), &args.output_dir, args.range()?)?
        .with_product_type(args.product_type)
        .with_orbit_direction(args.orbit_direction)
        .with_sensor_mode(args.sensor_mode)
        .with_max_records(args.max_records)
        .with_concurrent_downloads(args.concurrent_downloads);

    let products = match &args.area.geojson {
        Some(path) => query.query_by_geojson(path).await?,
        None => query.query(&args.area.bounds()?).await?,
    };

    for product in &products {
        println!(
            "{}\t{}\t{}\t{}",
            product.id,
            product.title,
            product.start_date.as_deref().unwrap_or("-"),
            product.orbit_direction.as_deref().unwrap_or("-")
        );
    }

    if args.download && !products.is_empty() {
        let selected = &products[..args.max_products.min(products.len())];
        let downloaded = query.download(selected).await?;
        for (_, path) in &downloaded {
            println!("📁 {}", path.display());
        }
    }
    Ok(())
}

async fn preprocess(args: PreprocessArgs) -> anyhow::Result<()> {
    args.validate()?;
    let output = args.output.clone();

    tokio::task::spawn_blocking(move || -> post_fire_analytics::Result<()> {
        let preprocessor = Sentinel1Preprocessor::new(&args.input)?;
        let processed = preprocessor.run(&args.options())?;
        preprocessor.save(&processed, &args.output)
    })
    .await
    .context("preprocessing task panicked")??;

    println!("✅ Saved {}", output.display());
    Ok(())
}

async fn run_pipeline(args: RunArgs) -> anyhow::Result<()> {
    let config = RunConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.validate()?;

    if args.dry_run {
        println!("Area: {}", config.area_bounds()?);
        println!("Sentinel-1 window: {:?}", config.sentinel1_range()?);
        if let Some(range) = config.gedi_range()? {
            println!("GEDI window: {:?}", range);
        }
        println!("Downloads: {}", config.download_dir().display());
        println!("Output: {}", config.output_path());
        return Ok(());
    }

    let monitor_enabled = args.monitor || config.monitoring_enabled();
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let storage = LocalStorage::new(config.output_path());
    let pipeline = FirePipeline::from_config(storage, &config)?;
    let engine = AnalyticsEngine::new_with_monitoring(pipeline, monitor_enabled);

    let output_path = engine.run().await?;
    tracing::info!("✅ Analysis completed successfully!");
    println!("✅ Analysis completed successfully!");
    println!("📁 Output saved to: {}", output_path);
    Ok(())
}

/// Logs the failure and maps it to a process exit code.
fn report(error: &anyhow::Error) -> i32 {
    let Some(e) = error.downcast_ref::<AnalyticsError>() else {
        tracing::error!("❌ {:#}", error);
        eprintln!("❌ {:#}", error);
        return 1;
    };

    tracing::error!(
        "❌ {:#} (Category: {:?}, Severity: {:?})",
        error,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

    match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}
