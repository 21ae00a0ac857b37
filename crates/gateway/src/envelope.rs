use courier_channels::ChannelMessageMeta;

/// Renders an inbound message into the text the agent sees.
pub trait EnvelopeFormatter: Send + Sync {
    fn format(&self, text: &str, meta: &ChannelMessageMeta) -> String;
}

/// `[sms +15551234567 (Ada) @ 1700000000]` header, the text, then one line
/// per attachment.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainEnvelopeFormatter;

impl EnvelopeFormatter for PlainEnvelopeFormatter {
    fn format(&self, text: &str, meta: &ChannelMessageMeta) -> String {
        let mut header = format!("[{} {}", meta.channel_type, meta.sender_id);
        if let Some(name) = meta.sender_name.as_deref().filter(|n| !n.is_empty()) {
            header.push_str(&format!(" ({name})"));
        }
        if let Some(ts) = meta.timestamp.as_deref() {
            header.push_str(&format!(" @ {ts}"));
        }
        header.push(']');

        let mut lines = vec![header];
        if !text.is_empty() {
            lines.push(text.to_string());
        }
        for media in &meta.media {
            lines.push(format!("[attachment {} {}]", media.mime_type, media.url));
        }
        lines.join("\n")
    }
}
