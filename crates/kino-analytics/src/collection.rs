//! Collection API parameter mapping
//!
//! Converts playback context descriptors and metadata into the parameter
//! names the media collection backend expects.

use crate::context::PlaybackContext;
use crate::hit::HitParams;
use crate::types::Metadata;
use serde_json::Value;

/// Hit parameter names
pub mod params {
    pub const MEDIA_ID: &str = "media.id";
    pub const MEDIA_NAME: &str = "media.name";
    pub const MEDIA_LENGTH: &str = "media.length";
    pub const MEDIA_CONTENT_TYPE: &str = "media.contentType";
    pub const MEDIA_STREAM_TYPE: &str = "media.streamType";
    pub const MEDIA_RESUME: &str = "media.resume";
    pub const MEDIA_DOWNLOADED: &str = "media.downloaded";
    pub const MEDIA_CHANNEL: &str = "media.channel";
    pub const MEDIA_PLAYER_NAME: &str = "media.playerName";
    pub const MEDIA_SDK_VERSION: &str = "media.sdkVersion";
    pub const MEDIA_LIBRARY_VERSION: &str = "media.libraryVersion";

    pub const AD_BREAK_POD_FRIENDLY_NAME: &str = "media.ad.podFriendlyName";
    pub const AD_BREAK_POD_INDEX: &str = "media.ad.podIndex";
    pub const AD_BREAK_POD_SECOND: &str = "media.ad.podSecond";

    pub const AD_NAME: &str = "media.ad.name";
    pub const AD_ID: &str = "media.ad.id";
    pub const AD_LENGTH: &str = "media.ad.length";
    pub const AD_POD_POSITION: &str = "media.ad.podPosition";
    pub const AD_PLAYER_NAME: &str = "media.ad.playerName";

    pub const CHAPTER_FRIENDLY_NAME: &str = "media.chapter.friendlyName";
    pub const CHAPTER_LENGTH: &str = "media.chapter.length";
    pub const CHAPTER_OFFSET: &str = "media.chapter.offset";
    pub const CHAPTER_INDEX: &str = "media.chapter.index";

    pub const QOE_BITRATE: &str = "media.qoe.bitrate";
    pub const QOE_DROPPED_FRAMES: &str = "media.qoe.droppedFrames";
    pub const QOE_FPS: &str = "media.qoe.framesPerSecond";
    pub const QOE_STARTUP_TIME: &str = "media.qoe.timeToStart";
    pub const QOE_ERROR_ID: &str = "media.qoe.errorID";
    pub const QOE_ERROR_SOURCE: &str = "media.qoe.errorSource";
    pub const QOE_ERROR_SOURCE_PLAYER: &str = "player";

    pub const STATE_NAME: &str = "media.state.name";

    pub const ANALYTICS_TRACKING_SERVER: &str = "analytics.trackingServer";
    pub const ANALYTICS_REPORT_SUITE: &str = "analytics.reportSuite";
    pub const ANALYTICS_SSL: &str = "analytics.enableSSL";
    pub const ANALYTICS_VISITOR_ID: &str = "analytics.visitorId";
    pub const ANALYTICS_AID: &str = "analytics.aid";
    pub const VISITOR_ORG_ID: &str = "visitor.marketingCloudOrgId";
    pub const VISITOR_USER_ID: &str = "visitor.marketingCloudUserId";
    pub const VISITOR_LOCATION_HINT: &str = "visitor.aamLocationHint";

    /// Correlation id carried on session start hits until they are reported
    pub const SESSION_ID: &str = "sessionid";
}

/// Well-known media metadata keys and the params they map to
const STANDARD_MEDIA_METADATA: &[(&str, &str)] = &[
    ("show", "media.show"),
    ("season", "media.season"),
    ("episode", "media.episode"),
    ("assetID", "media.assetId"),
    ("genre", "media.genre"),
    ("firstAirDate", "media.firstAirDate"),
    ("firstDigitalDate", "media.firstDigitalDate"),
    ("rating", "media.rating"),
    ("originator", "media.originator"),
    ("network", "media.network"),
    ("showType", "media.showType"),
    ("adLoad", "media.adLoad"),
    ("mvpd", "media.pass.mvpd"),
    ("isAuthenticated", "media.pass.auth"),
    ("dayPart", "media.dayPart"),
    ("feed", "media.feed"),
    ("streamFormat", "media.streamFormat"),
    ("artist", "media.artist"),
    ("album", "media.album"),
    ("label", "media.label"),
    ("author", "media.author"),
    ("station", "media.station"),
    ("publisher", "media.publisher"),
];

/// Well-known ad metadata keys and the params they map to
const STANDARD_AD_METADATA: &[(&str, &str)] = &[
    ("advertiser", "media.ad.advertiser"),
    ("campaignID", "media.ad.campaignId"),
    ("creativeID", "media.ad.creativeId"),
    ("creativeURL", "media.ad.creativeURL"),
    ("placementID", "media.ad.placementId"),
    ("siteID", "media.ad.siteId"),
];

fn standard_key(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(metadata_key, _)| *metadata_key == key)
        .map(|(_, param)| *param)
}

fn standard_params(table: &[(&str, &'static str)], metadata: &Metadata, out: &mut HitParams) {
    for (key, value) in metadata {
        if let Some(param) = standard_key(table, key) {
            out.insert(param.to_string(), Value::String(value.clone()));
        }
    }
}

fn custom_metadata(table: &[(&str, &'static str)], metadata: &Metadata) -> Metadata {
    metadata
        .iter()
        .filter(|(key, _)| standard_key(table, key).is_none())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Media params plus standard media metadata
pub fn media_params(ctx: &PlaybackContext) -> HitParams {
    let media = ctx.media();
    let mut out = HitParams::new();
    out.insert(params::MEDIA_ID.into(), media.id.clone().into());
    out.insert(params::MEDIA_NAME.into(), media.name.clone().into());
    out.insert(params::MEDIA_LENGTH.into(), media.length.into());
    out.insert(params::MEDIA_CONTENT_TYPE.into(), media.stream_type.clone().into());
    out.insert(params::MEDIA_STREAM_TYPE.into(), media.media_type.as_str().into());
    out.insert(params::MEDIA_RESUME.into(), media.resumed.into());
    standard_params(STANDARD_MEDIA_METADATA, ctx.media_metadata(), &mut out);
    out
}

/// Media metadata that has no standard param
pub fn media_metadata(ctx: &PlaybackContext) -> Metadata {
    custom_metadata(STANDARD_MEDIA_METADATA, ctx.media_metadata())
}

pub fn ad_break_params(ctx: &PlaybackContext) -> HitParams {
    let mut out = HitParams::new();
    if let Some(ad_break) = ctx.ad_break() {
        out.insert(params::AD_BREAK_POD_FRIENDLY_NAME.into(), ad_break.name.clone().into());
        out.insert(params::AD_BREAK_POD_INDEX.into(), ad_break.position.into());
        out.insert(params::AD_BREAK_POD_SECOND.into(), ad_break.start_time.into());
    }
    out
}

/// Ad params plus standard ad metadata
pub fn ad_params(ctx: &PlaybackContext) -> HitParams {
    let mut out = HitParams::new();
    if let Some(ad) = ctx.ad() {
        out.insert(params::AD_NAME.into(), ad.name.clone().into());
        out.insert(params::AD_ID.into(), ad.id.clone().into());
        out.insert(params::AD_LENGTH.into(), ad.length.into());
        out.insert(params::AD_POD_POSITION.into(), ad.position.into());
    }
    standard_params(STANDARD_AD_METADATA, ctx.ad_metadata(), &mut out);
    out
}

pub fn ad_metadata(ctx: &PlaybackContext) -> Metadata {
    custom_metadata(STANDARD_AD_METADATA, ctx.ad_metadata())
}

pub fn chapter_params(ctx: &PlaybackContext) -> HitParams {
    let mut out = HitParams::new();
    if let Some(chapter) = ctx.chapter() {
        out.insert(params::CHAPTER_FRIENDLY_NAME.into(), chapter.name.clone().into());
        out.insert(params::CHAPTER_LENGTH.into(), chapter.length.into());
        out.insert(params::CHAPTER_OFFSET.into(), chapter.start_time.into());
        out.insert(params::CHAPTER_INDEX.into(), chapter.position.into());
    }
    out
}

/// Chapter metadata is always reported as custom metadata
pub fn chapter_metadata(ctx: &PlaybackContext) -> Metadata {
    ctx.chapter_metadata().clone()
}

/// Current QoE snapshot, empty when none has been set. Values are reported
/// as whole numbers.
pub fn qoe_data(ctx: &PlaybackContext) -> HitParams {
    let mut out = HitParams::new();
    if let Some(qoe) = ctx.qoe() {
        out.insert(params::QOE_BITRATE.into(), (qoe.bitrate as i64).into());
        out.insert(params::QOE_DROPPED_FRAMES.into(), (qoe.dropped_frames as i64).into());
        out.insert(params::QOE_FPS.into(), (qoe.fps as i64).into());
        out.insert(params::QOE_STARTUP_TIME.into(), (qoe.startup_time as i64).into());
    }
    out
}
