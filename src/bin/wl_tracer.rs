// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Entry point: parse arguments, load the protocol catalog, set up the first instance (or the
//! listening socket, in server mode), and run the event loop.

use std::collections::HashMap;
use std::io::Write;

use clap::Parser;
use log::{error, info, warn};

use wl_tracer::catalog::{self, ProtocolCatalog};
use wl_tracer::cli::Cli;
use wl_tracer::error::{ConfigError, Error, Result};
use wl_tracer::event_loop::{EventLoop, Source};
use wl_tracer::frontend::analyze::AnalyzeFrontend;
use wl_tracer::frontend::binary::BinaryFrontend;
use wl_tracer::frontend::Frontend;
use wl_tracer::instance::Instance;
use wl_tracer::socket_setup;
use wl_tracer::spawn;
use wl_tracer::wire::WireConnection;

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.is_server_mode() && !cli.client.is_empty() {
        warn!("a client command was given alongside -S; it will be ignored in server mode");
    }
    if !cli.is_server_mode() && cli.client.is_empty() {
        return Err(Error::Config(ConfigError::BadArguments(
            "no client specified; pass it after `--` in single mode".to_string(),
        )));
    }

    let catalog = if cli.protocol.is_empty() {
        ProtocolCatalog::default()
    } else {
        catalog::load(&cli.protocol)?
    };
    let frontend: Box<dyn Frontend> =
        if cli.protocol.is_empty() { Box::new(BinaryFrontend) } else { Box::new(AnalyzeFrontend) };

    let mut output = open_output(&cli)?;
    let event_loop = EventLoop::new()?;
    let mut instances: HashMap<u64, Instance> = HashMap::new();
    let mut next_instance_id: u64 = 0;
    let single_mode = !cli.is_server_mode();

    let listener = match &cli.server {
        Some(name) => {
            let created = socket_setup::create_listener(Some(name))?;
            event_loop.add_listener(created.listener.as_fd())?;
            Some(created)
        }
        None => {
            let child = spawn::spawn_child(&cli.client)?;
            let compositor_side = socket_setup::connect_server(None)?;
            add_instance(
                &event_loop,
                &mut instances,
                &mut next_instance_id,
                WireConnection::new(child.tracer_side)?,
                WireConnection::new(compositor_side)?,
                &catalog,
            )?;
            info!("[{}] spawned child, relaying to compositor", next_instance_id - 1);
            None
        }
    };

    loop {
        let readiness = event_loop.wait_one()?;
        match readiness.source {
            Source::Listener => {
                let Some(listener) = listener.as_ref() else { continue };
                let (client_sock, _addr) = listener.listener.accept()?;
                match socket_setup::connect_server(None) {
                    Ok(compositor_sock) => {
                        add_instance(
                            &event_loop,
                            &mut instances,
                            &mut next_instance_id,
                            WireConnection::new(client_sock)?,
                            WireConnection::new(compositor_sock)?,
                            &catalog,
                        )?;
                        info!("[{}] accepted client, connected to compositor", next_instance_id - 1);
                    }
                    Err(e) => warn!("failed to connect new client to compositor: {e}"),
                }
            }
            Source::Connection { instance_id, side } => {
                let mut closed = readiness.hangup;
                if readiness.readable {
                    if let Some(instance) = instances.get_mut(&instance_id) {
                        match instance.connection_mut(side).read() {
                            Ok(0) => closed = true,
                            Ok(_) => {
                                if let Err(e) =
                                    frontend.handle_readable(instance, side, &catalog, output.as_mut())
                                {
                                    warn!("[{instance_id}] {e}");
                                    closed = true;
                                } else {
                                    let (_this, peer) = instance.connection_and_peer_mut(side);
                                    let _ = peer.flush();
                                }
                            }
                            Err(e) => {
                                warn!("[{instance_id}] read error: {e}");
                                closed = true;
                            }
                        }
                    }
                }

                if closed {
                    instances.remove(&instance_id);
                    info!("[{instance_id}] instance torn down");
                    if single_mode {
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn add_instance(
    event_loop: &EventLoop,
    instances: &mut HashMap<u64, Instance>,
    next_instance_id: &mut u64,
    client_side: WireConnection,
    compositor_side: WireConnection,
    catalog: &ProtocolCatalog,
) -> Result<()> {
    let id = *next_instance_id;
    let instance = Instance::new(id, client_side, compositor_side, catalog);
    event_loop.add_connection(instance.client_side.as_fd(), id, wl_tracer::registry::Side::Client)?;
    event_loop.add_connection(
        instance.compositor_side.as_fd(),
        id,
        wl_tracer::registry::Side::Compositor,
    )?;
    instances.insert(id, instance);
    *next_instance_id += 1;
    Ok(())
}

fn open_output(cli: &Cli) -> Result<Box<dyn Write>> {
    match &cli.output {
        Some(path) => Ok(Box::new(std::fs::File::create(path)?)),
        None => Ok(Box::new(std::io::stdout())),
    }
}
