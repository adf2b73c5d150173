use std::{
    collections::HashMap,
    io::Cursor,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{never, select, Receiver};
use image::{imageops::FilterType, ImageFormat};
use media_client::{
    config::{load_settings, load_settings_file},
    content::{FetcherChain, FileFetcher, PartRequestHandler},
    geometry::Bounds,
    AvatarCluster, Delivery, HandleState, JobPhase, MediaSettings, ParticipantLookup,
    ProgressiveImageController, SyncBridge, TaskBackend,
};
use shared::{
    domain::{Member, MemberId, MessageId, SlotId},
    protocol::{compose_three_part, orientation_from_exif, preview_dimensions, ImageInfo, Message},
};
use tracing::{info, warn};

mod store;

use store::LocalContentStore;

#[derive(Parser, Debug)]
struct Args {
    /// Cluster member as `id:name[:avatar-url]`. Repeatable.
    #[arg(long = "member")]
    members: Vec<String>,
    #[arg(long, default_value_t = 40.0)]
    width: f32,
    #[arg(long, default_value_t = 40.0)]
    height: f32,
    /// Image file to send through the progressive preview/full pipeline.
    #[arg(long)]
    image: Option<PathBuf>,
    /// EXIF orientation tag of `--image`.
    #[arg(long, default_value_t = 1)]
    exif_orientation: u16,
    #[arg(long, default_value_t = 1000)]
    max_width: u32,
    /// Keep the full image remote so it has to be downloaded after the preview.
    #[arg(long)]
    defer_full: bool,
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long, default_value_t = 10)]
    wait_secs: u64,
}

struct Roster(HashMap<MemberId, Member>);

impl ParticipantLookup for Roster {
    fn participant(&self, member_id: &MemberId) -> Option<Member> {
        self.0.get(member_id).cloned()
    }
}

fn parse_member(raw: &str) -> Result<Member> {
    let mut fields = raw.splitn(3, ':');
    let id = fields.next().filter(|id| !id.is_empty());
    let name = fields.next().filter(|name| !name.is_empty());
    let (Some(id), Some(name)) = (id, name) else {
        bail!("member must look like id:name[:avatar-url], got {raw:?}");
    };
    Ok(Member {
        member_id: MemberId::from(id),
        display_name: name.to_string(),
        avatar_url: fields.next().filter(|url| !url.is_empty()).map(str::to_string),
    })
}

fn encode_png(image: &image::DynamicImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("failed to encode preview")?;
    Ok(out.into_inner())
}

fn build_message(path: &Path, exif: u16, settings: &MediaSettings) -> Result<Message> {
    let full = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let format = image::guess_format(&full).context("unrecognised image format")?;
    let decoded = image::load_from_memory(&full).context("failed to decode image")?;
    let (width, height) = (decoded.width(), decoded.height());

    let preview = match preview_dimensions(
        width,
        height,
        settings.preview_max_width,
        settings.preview_max_height,
    ) {
        Some((w, h)) => Some(encode_png(&decoded.resize_exact(w, h, FilterType::Triangle))?),
        None => None,
    };
    let info = ImageInfo::new(orientation_from_exif(exif), width, height)?;
    let file_name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| anyhow!("image path has no usable file name"))?;

    Ok(compose_three_part(
        &settings.content_scheme,
        MessageId::from(file_name),
        format.to_mime_type(),
        full,
        preview,
        info,
    )?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();
    let settings = match &args.settings {
        Some(path) => load_settings_file(path)?,
        None => load_settings()?,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    let store = LocalContentStore::new();
    let bridge = SyncBridge::new(Arc::new(store.clone()), settings.sync_timeout());
    let fetchers = FetcherChain::new()
        .with(Arc::new(PartRequestHandler::new(
            settings.content_scheme.clone(),
            bridge,
        )))
        .with(Arc::new(FileFetcher));
    let backend = Arc::new(TaskBackend::new(
        runtime.handle().clone(),
        fetchers,
        &settings,
    ));

    let members = args
        .members
        .iter()
        .map(|raw| parse_member(raw))
        .collect::<Result<Vec<_>>>()?;
    let order: Vec<MemberId> = members.iter().map(|m| m.member_id.clone()).collect();
    let roster = Roster(
        members
            .into_iter()
            .map(|member| (member.member_id.clone(), member))
            .collect(),
    );

    let cluster = AvatarCluster::new(Arc::new(roster), backend.clone(), &settings);
    cluster.set_bounds(Bounds::new(args.width, args.height));
    let reconciled = cluster.reconcile(order);
    for skipped in &reconciled.skipped {
        warn!(member = %skipped, "desktop: member not in roster");
    }

    let controller =
        ProgressiveImageController::new(backend, Arc::new(store.clone()), &settings);
    let slot = SlotId(1);
    let image_rx: Receiver<Delivery> = match &args.image {
        Some(path) => {
            let message = build_message(path, args.exif_orientation, &settings)?;
            store.add_message(&message, args.defer_full);
            let phase = controller.bind(slot, &message, args.max_width)?;
            info!(?phase, message_id = %message.message_id, "desktop: image bound");
            controller.deliveries()
        }
        None => never(),
    };

    let cluster_rx = cluster.deliveries();
    let deadline = Instant::now() + Duration::from_secs(args.wait_secs);
    loop {
        let avatars_done = cluster
            .snapshot()
            .avatars
            .iter()
            .all(|avatar| avatar.state != HandleState::Pending);
        let image_done = controller
            .slot_view(slot)
            .map_or(true, |view| view.phase == JobPhase::Done);
        if avatars_done && image_done {
            break;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!("desktop: gave up waiting for images");
            break;
        }
        select! {
            recv(cluster_rx) -> delivery => {
                if let Ok(delivery) = delivery {
                    cluster.apply_delivery(delivery);
                }
            }
            recv(image_rx) -> delivery => {
                if let Ok(delivery) = delivery {
                    controller.apply_delivery(delivery);
                }
            }
            default(remaining) => {}
        }
    }

    let snapshot = cluster.snapshot();
    if let Some(geometry) = snapshot.geometry {
        println!(
            "cluster: {} avatar(s), outer radius {:.1}, text size {:.1}",
            geometry.count, geometry.outer_radius, geometry.text_size
        );
    }
    for avatar in &snapshot.avatars {
        let size = avatar
            .image
            .as_ref()
            .map(|image| format!("{}x{}", image.width(), image.height()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} [{}] {:?} at ({:.1}, {:.1}) image {}",
            avatar.member_id, avatar.initials, avatar.state, avatar.center.0, avatar.center.1, size
        );
    }
    if let Some(view) = controller.slot_view(slot) {
        println!(
            "image {}: {:?}, showing {:?}, {}x{} rotated {} placeholder={}",
            view.message_id,
            view.phase,
            view.showing,
            view.size.width,
            view.size.height,
            view.size.rotation_degrees,
            view.placeholder
        );
    }

    runtime.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_argument_keeps_colons_in_the_url() {
        let member = parse_member("a1:Alice:https://avatars.test/a.png").expect("member");
        assert_eq!(member.member_id, MemberId::from("a1"));
        assert_eq!(member.display_name, "Alice");
        assert_eq!(
            member.avatar_url.as_deref(),
            Some("https://avatars.test/a.png")
        );
    }

    #[test]
    fn member_argument_without_url_has_initials_only() {
        let member = parse_member("b2:Bob").expect("member");
        assert!(member.avatar_url.is_none());
        assert!(parse_member("only-id").is_err());
        assert!(parse_member(":NoId").is_err());
    }
}
