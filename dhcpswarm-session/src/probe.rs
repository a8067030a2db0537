//! Server readiness probe
//!
//! Before the swarm launches it is worth knowing whether anything is
//! listening at all. The probe sends DISCOVERs (SOLICITs in v6 mode)
//! under throwaway identities and declares the server ready as soon as
//! any reply lands, retrying every few seconds until the configured
//! wait budget runs out.

use std::time::Duration;

use dhcpswarm_core::{Error, ProtocolVariant, Result, RunMode};
use dhcpswarm_protocols::dhcpv6::Dhcpv6Packet;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::identity::ClientIdentity;
use crate::session::{SessionContext, ShutdownSignal};
use crate::transport::DeliveryQueue;

const PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Block until the server answers a probe, the shutdown signal fires, or
/// the wait budget expires. A config without a wait budget skips probing.
pub async fn wait_for_server(ctx: &SessionContext) -> Result<()> {
    let Some(budget) = ctx.config.server_wait else {
        return Ok(());
    };
    let variant = match ctx.config.mode {
        RunMode::V6 => ProtocolVariant::V6,
        RunMode::V4 | RunMode::Dual => ProtocolVariant::V4,
    };
    let mut shutdown = ctx.shutdown.clone();
    let started = Instant::now();
    let deadline = started + budget;
    info!(%variant, budget_secs = budget.as_secs(), "probing for a live server");

    let mut attempt = 0u32;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::timeout("a server reply to the readiness probe"));
        }
        let window = PROBE_INTERVAL.min(deadline - now);
        let answered = match variant {
            ProtocolVariant::V4 => probe_v4(ctx, &mut shutdown, started, window).await?,
            ProtocolVariant::V6 => probe_v6(ctx, &mut shutdown, started, window).await?,
        };
        if answered {
            info!(
                waited_ms = started.elapsed().as_millis() as u64,
                "server answered"
            );
            return Ok(());
        }
        attempt += 1;
        debug!(attempt, "probe unanswered, trying again");
    }
}

async fn probe_v4(
    ctx: &SessionContext,
    shutdown: &mut ShutdownSignal,
    started: Instant,
    window: Duration,
) -> Result<bool> {
    let identity = ClientIdentity::generate(0, RunMode::V4);
    let (xid, mut queue) = crate::dhcpv4::register(&ctx.table, identity.mac);
    ctx.sink
        .send_frame(&crate::dhcpv4::discover_frame(xid, identity.mac, started.elapsed()))?;
    ctx.stats.frame_sent();
    wait_for_any(shutdown, &mut queue, window).await
}

async fn probe_v6(
    ctx: &SessionContext,
    shutdown: &mut ShutdownSignal,
    started: Instant,
    window: Duration,
) -> Result<bool> {
    let identity = ClientIdentity::generate(0, RunMode::V6);
    let duid = identity
        .duid
        .clone()
        .unwrap_or_else(|| Dhcpv6Packet::generate_duid_llt(identity.mac));
    let (txid, mut queue) = crate::dhcpv6::register(&ctx.table, identity.mac);
    ctx.sink.send_frame(&crate::dhcpv6::solicit_frame(
        txid,
        identity.mac,
        &duid,
        identity.iaid(),
        started.elapsed(),
    ))?;
    ctx.stats.frame_sent();
    wait_for_any(shutdown, &mut queue, window).await
}

/// The probe queue is keyed by our own transaction id, so any delivery at
/// all proves a server is answering. Its content does not matter.
async fn wait_for_any(
    shutdown: &mut ShutdownSignal,
    queue: &mut DeliveryQueue,
    window: Duration,
) -> Result<bool> {
    tokio::select! {
        biased;
        _ = shutdown.triggered() => Err(Error::Interrupted),
        delivered = queue.recv() => match delivered {
            Some(_) => Ok(true),
            None => Err(Error::transport("delivery queue closed during the probe")),
        },
        _ = tokio::time::sleep(window) => Ok(false),
    }
}
