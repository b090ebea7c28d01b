//! Paper trading settlement simulation.
//!
//! Runs the engine against in-memory stores: a spot swap, a priced limit order,
//! a liquidation, a profitable manual close, a close condition, and finally the
//! scheduler driving a few sweeps on its own.

use paper_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::error::Error;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

type SimResult = Result<(), Box<dyn Error>>;

#[tokio::main]
async fn main() -> SimResult {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = SettlementConfig::fast();
    config.validate()?;

    println!("Paper Trading Settlement Simulation\n");

    scenario_a_liquidation(&config).await?;
    scenario_b_manual_close(&config).await?;
    scenario_c_market_spot(&config).await?;
    scenario_d_limit_fill(&config).await?;
    scenario_e_close_condition(&config).await?;
    scenario_f_scheduler(&config).await?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn usdc() -> Asset {
    Asset::new("USDC")
}

fn eth() -> Asset {
    Asset::new("ETH")
}

fn price(v: Decimal) -> Result<Price, Box<dyn Error>> {
    Price::new(v).ok_or_else(|| format!("bad price {v}").into())
}

// engine over fresh memory stores with ETH and USDC priced
async fn setup(config: &SettlementConfig, eth_usd: Decimal) -> Result<(MemoryBackend, Engine), Box<dyn Error>> {
    let backend = MemoryBackend::new();
    backend.oracle.set_price(&usdc(), price(dec!(1))?);
    backend.oracle.set_price(&eth(), price(eth_usd)?);
    let engine = Engine::new(config.engine.clone(), backend.collaborators())?;
    Ok((backend, engine))
}

async fn sweep(engine: &Engine, config: &SettlementConfig) -> SweepReport {
    let (_tx, rx) = watch::channel(false);
    engine.run_sweep(config.scheduler.entity_timeout, &rx).await
}

async fn print_balance(engine: &Engine, user: &UserId) -> SimResult {
    let portfolio = engine.portfolio(user).await?;
    let mut holdings: Vec<_> = portfolio.balance.holdings.iter().collect();
    holdings.sort();
    for (asset, qty) in holdings {
        println!("    {asset}: {:.4}", qty);
    }
    println!(
        "    net worth: ${} (holdings under {} hidden)",
        portfolio.net_worth()?,
        engine.config().dust_threshold
    );
    Ok(())
}

/// 5x long ETH/USDC from 200, market drops to 160.
async fn scenario_a_liquidation(config: &SettlementConfig) -> SimResult {
    println!("Scenario A: Liquidation\n");

    let (backend, engine) = setup(config, dec!(200)).await?;
    let alice = UserId::new("alice");
    engine
        .open_account(&alice, "alice-dm".into(), [(usdc(), dec!(1000))])
        .await?;

    let request = OrderRequest::levered(
        alice.clone(),
        usdc(),
        eth(),
        SellAmount::Exact(dec!(1000)),
        dec!(5),
        Side::Long,
    );
    engine.submit_order(request).await?;
    let report = sweep(&engine, config).await;
    println!("  Alice opens 5x long with 1000 USDC at 200, opened: {}", report.positions_opened);

    backend.oracle.set_price(&eth(), price(dec!(160))?);
    let report = sweep(&engine, config).await;
    println!("  ETH drops to 160, liquidated: {}", report.positions_liquidated);
    print_balance(&engine, &alice).await?;
    println!();
    Ok(())
}

/// Same position, market rises to 220, user closes.
async fn scenario_b_manual_close(config: &SettlementConfig) -> SimResult {
    println!("Scenario B: Manual Close In Profit\n");

    let (backend, engine) = setup(config, dec!(200)).await?;
    let alice = UserId::new("alice");
    engine
        .open_account(&alice, "alice-dm".into(), [(usdc(), dec!(1000))])
        .await?;
    let request = OrderRequest::levered(
        alice.clone(),
        usdc(),
        eth(),
        SellAmount::Exact(dec!(1000)),
        dec!(5),
        Side::Long,
    );
    engine.submit_order(request).await?;
    sweep(&engine, config).await;

    backend.oracle.set_price(&eth(), price(dec!(220))?);
    for position in engine.open_positions(&alice).await? {
        let outcome = engine.close_position(&alice, position.id).await?;
        println!("  ETH rises to 220, closed: {outcome:?}");
    }
    print_balance(&engine, &alice).await?;
    println!();
    Ok(())
}

/// Market sell 5 ETH for USDC at 2000.
async fn scenario_c_market_spot(config: &SettlementConfig) -> SimResult {
    println!("Scenario C: Market Spot Swap\n");

    let (backend, engine) = setup(config, dec!(2000)).await?;
    let bob = UserId::new("bob");
    engine.open_account(&bob, "bob-dm".into(), [(eth(), dec!(5))]).await?;

    let request = OrderRequest::spot(bob.clone(), eth(), usdc(), SellAmount::Exact(dec!(5)));
    engine.submit_order(request).await?;
    let report = sweep(&engine, config).await;
    println!("  Bob sells 5 ETH at market, filled: {}", report.orders_filled);
    print_balance(&engine, &bob).await?;
    println!("  trades recorded: {}", backend.trades.all().len());
    println!();
    Ok(())
}

/// Long limit at 400 fills at 400 when the ratio is 350.
async fn scenario_d_limit_fill(config: &SettlementConfig) -> SimResult {
    println!("Scenario D: Limit Order Fills At Target\n");

    let (backend, engine) = setup(config, dec!(450)).await?;
    let carol = UserId::new("carol");
    engine
        .open_account(&carol, "carol-dm".into(), [(usdc(), dec!(800))])
        .await?;

    let request = OrderRequest::spot(carol.clone(), usdc(), eth(), SellAmount::Exact(dec!(800)))
        .at_price(dec!(400));
    engine.submit_order(request).await?;

    let report = sweep(&engine, config).await;
    println!("  ETH at 450, limit at 400 waiting: {}", report.orders_waiting);

    backend.oracle.set_price(&eth(), price(dec!(350))?);
    let report = sweep(&engine, config).await;
    println!("  ETH at 350, filled: {}", report.orders_filled);
    print_balance(&engine, &carol).await?;
    println!();
    Ok(())
}

/// Lower bound at 800 closes a 2x short when ETH rallies.
async fn scenario_e_close_condition(config: &SettlementConfig) -> SimResult {
    println!("Scenario E: Close Condition\n");

    let (backend, engine) = setup(config, dec!(200)).await?;
    let dave = UserId::new("dave");
    engine
        .open_account(&dave, "dave-dm".into(), [(usdc(), dec!(1000))])
        .await?;
    let request = OrderRequest::levered(
        dave.clone(),
        usdc(),
        eth(),
        SellAmount::Exact(dec!(1000)),
        dec!(2),
        Side::Short,
    );
    engine.submit_order(request).await?;
    sweep(&engine, config).await;

    for position in engine.open_positions(&dave).await? {
        engine
            .set_close_condition(&dave, position.id, Quote::new(dec!(1500)), Quote::new(dec!(800)))
            .await?;
    }

    // +15% against a 2x short: value 700
    backend.oracle.set_price(&eth(), price(dec!(230))?);
    let report = sweep(&engine, config).await;
    println!("  ETH rallies to 230, closed by lower bound: {}", report.positions_closed);
    for message in backend.notifier.messages_to("dave-dm") {
        println!("    > {message}");
    }
    print_balance(&engine, &dave).await?;
    println!();
    Ok(())
}

/// Let the scheduler run a few sweeps, then shut it down.
async fn scenario_f_scheduler(config: &SettlementConfig) -> SimResult {
    println!("Scenario F: Scheduler\n");

    let (_backend, engine) = setup(config, dec!(2000)).await?;
    let erin = UserId::new("erin");
    engine
        .open_account(&erin, "erin-dm".into(), [(usdc(), dec!(10000))])
        .await?;
    let request = OrderRequest::spot(erin.clone(), usdc(), eth(), SellAmount::All);
    engine.submit_order(request).await?;

    let scheduler = Scheduler::new(engine.clone(), config.scheduler.clone())?;
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler.run(rx));

    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(true)?;
    let sweeps = handle.await?;

    println!("  scheduler ran {sweeps} sweeps");
    print_balance(&engine, &erin).await?;
    Ok(())
}
