//! Unit tests for domain models.

use super::*;

#[cfg(test)]
mod media_kind_tests {
    use super::*;

    #[test]
    fn integer_codes_are_stable() {
        assert_eq!(MediaKind::Image.as_i64(), 1);
        assert_eq!(MediaKind::Video.as_i64(), 2);
        assert_eq!(MediaKind::Audio.as_i64(), 3);
        assert_eq!(MediaKind::Document.as_i64(), 4);
        assert_eq!(MediaKind::Sticker.as_i64(), 5);
    }

    #[test]
    fn from_i64_maps_back() {
        for kind in [
            MediaKind::Image,
            MediaKind::Video,
            MediaKind::Audio,
            MediaKind::Document,
            MediaKind::Sticker,
        ] {
            assert_eq!(MediaKind::from_i64(kind.as_i64()), Some(kind));
        }
    }

    #[test]
    fn from_i64_rejects_unknown() {
        assert_eq!(MediaKind::from_i64(0), None);
        assert_eq!(MediaKind::from_i64(42), None);
    }

    #[test]
    fn display_uses_label() {
        assert_eq!(MediaKind::Sticker.to_string(), "sticker");
    }
}

#[cfg(test)]
mod media_attachment_tests {
    use super::*;

    fn payload() -> MediaPayload {
        MediaPayload {
            width: Some(10),
            height: Some(20),
            file_name: Some("report.pdf".to_string()),
            ..MediaPayload::default()
        }
    }

    #[test]
    fn sticker_keeps_dimensions() {
        let media = MediaAttachment::from_payload(MediaKind::Sticker, &payload());
        assert_eq!((media.width, media.height), (Some(10), Some(20)));
        assert!(media.file_name.is_none());
    }

    #[test]
    fn video_drops_dimensions_and_name() {
        let media = MediaAttachment::from_payload(MediaKind::Video, &payload());
        assert_eq!((media.width, media.height), (None, None));
        assert!(media.file_name.is_none());
    }
}

#[cfg(test)]
mod summary_tests {
    use super::*;
    use chrono::TimeZone;

    fn decoded(text: &str, media_type: Option<MediaKind>, is_from_me: bool) -> DecodedMessage {
        DecodedMessage {
            id: "m1".to_string(),
            chat: Jid::pn("1001"),
            sender: Jid::pn("1002"),
            push_name: Some("Alice".to_string()),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default(),
            is_from_me,
            text: text.to_string(),
            reply_to_message_id: None,
            mentions: Vec::new(),
            edited: false,
            forwarded: false,
            media_type,
            file_name: None,
        }
    }

    #[test]
    fn own_messages_are_labelled_you() {
        let summary = ChatSummary::from_message(&decoded("hi", None, true));
        assert_eq!(summary.sender, "You");
        assert_eq!(summary.message_time, 1_700_000_000);
    }

    #[test]
    fn push_name_preferred_over_user() {
        let summary = ChatSummary::from_message(&decoded("hi", None, false));
        assert_eq!(summary.sender, "Alice");
        assert_eq!(sender_label(false, Some(""), &Jid::pn("1002")), "1002");
        assert_eq!(sender_label(false, None, &Jid::pn("1002")), "1002");
    }

    #[test]
    fn empty_text_uses_media_label() {
        let summary = ChatSummary::from_message(&decoded("", Some(MediaKind::Image), false));
        assert_eq!(summary.message_text, "image");
        let summary = ChatSummary::from_message(&decoded("", None, false));
        assert_eq!(summary.message_text, "message");
    }

    #[test]
    fn migration_report_changed() {
        assert!(!MigrationReport::default().changed());
        let report = MigrationReport {
            senders_migrated: 1,
            ..MigrationReport::default()
        };
        assert!(report.changed());
    }
}
