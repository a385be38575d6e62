//! Chromium browser family (Chrome, Chromium, Edge, Brave, Opera)
//!
//! All of them share the profile layout `<profile root>/<profile>/<artifact>`
//! except Opera, which keeps artifacts directly under the profile root.

pub mod history;

/// One Chromium-based browser and where its profiles live
#[derive(Debug, Clone, Copy)]
pub struct ChromiumBrowser {
    pub id: &'static str,
    pub display_name: &'static str,
    /// Profile roots relative to a user home (Windows, macOS, Linux)
    pub profile_roots: &'static [&'static str],
    /// Artifacts sit directly under the root (no Default/Profile N level)
    pub flat_profile: bool,
}

pub const CHROMIUM_BROWSERS: &[ChromiumBrowser] = &[
    ChromiumBrowser {
        id: "chrome",
        display_name: "Google Chrome",
        profile_roots: &[
            "AppData/Local/Google/Chrome/User Data",
            "Library/Application Support/Google/Chrome",
            ".config/google-chrome",
        ],
        flat_profile: false,
    },
    ChromiumBrowser {
        id: "chrome_beta",
        display_name: "Google Chrome Beta",
        profile_roots: &[
            "AppData/Local/Google/Chrome Beta/User Data",
            "Library/Application Support/Google/Chrome Beta",
            ".config/google-chrome-beta",
        ],
        flat_profile: false,
    },
    ChromiumBrowser {
        id: "chromium",
        display_name: "Chromium",
        profile_roots: &[
            "AppData/Local/Chromium/User Data",
            "Library/Application Support/Chromium",
            ".config/chromium",
        ],
        flat_profile: false,
    },
    ChromiumBrowser {
        id: "edge",
        display_name: "Microsoft Edge",
        profile_roots: &[
            "AppData/Local/Microsoft/Edge/User Data",
            "Library/Application Support/Microsoft Edge",
            ".config/microsoft-edge",
        ],
        flat_profile: false,
    },
    ChromiumBrowser {
        id: "brave",
        display_name: "Brave",
        profile_roots: &[
            "AppData/Local/BraveSoftware/Brave-Browser/User Data",
            "Library/Application Support/BraveSoftware/Brave-Browser",
            ".config/BraveSoftware/Brave-Browser",
        ],
        flat_profile: false,
    },
    ChromiumBrowser {
        id: "opera",
        display_name: "Opera",
        profile_roots: &[
            "AppData/Roaming/Opera Software/Opera Stable",
            "Library/Application Support/com.operasoftware.Opera",
            ".config/opera",
        ],
        flat_profile: true,
    },
];

/// Browser and profile a discovered artifact belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLocation {
    pub browser: &'static str,
    pub profile: String,
}

/// Attribute `logical_path` (ending in `artifact`) to a browser profile
///
/// `None` for files that merely share the artifact's name.
pub fn classify_profile_path(logical_path: &str, artifact: &str) -> Option<ProfileLocation> {
    // ASCII lowering keeps byte offsets valid in `original`
    let original = format!("/{}", logical_path.replace('\\', "/").trim_start_matches('/'));
    let lower = original.to_ascii_lowercase();
    let artifact_lower = artifact.to_ascii_lowercase();

    for browser in CHROMIUM_BROWSERS {
        for root in browser.profile_roots {
            let needle = format!("/{}/", root.to_ascii_lowercase());
            let Some(pos) = lower.find(&needle) else { continue };

            let rest = &lower[pos + needle.len()..];
            let components: Vec<&str> = rest.split('/').collect();

            match components.as_slice() {
                [file] if browser.flat_profile && *file == artifact_lower => {
                    let profile = root.rsplit('/').next().unwrap_or(*root);
                    return Some(ProfileLocation {
                        browser: browser.id,
                        profile: profile.to_string(),
                    });
                }
                [_, file] if !browser.flat_profile && *file == artifact_lower => {
                    let profile = original[pos + needle.len()..].split('/').next().unwrap_or_default();
                    return Some(ProfileLocation {
                        browser: browser.id,
                        profile: profile.to_string(),
                    });
                }
                _ => {}
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_profile_path() {
        let chrome = classify_profile_path(
            "Users/bob/AppData/Local/Google/Chrome/User Data/Profile 2/History",
            "History",
        )
        .unwrap();
        assert_eq!(chrome.browser, "chrome");
        assert_eq!(chrome.profile, "Profile 2");

        let edge = classify_profile_path(
            "/home/alice/.config/microsoft-edge/Default/History",
            "History",
        )
        .unwrap();
        assert_eq!(edge, ProfileLocation { browser: "edge", profile: "Default".into() });

        let opera = classify_profile_path(
            "Users/bob/AppData/Roaming/Opera Software/Opera Stable/History",
            "History",
        )
        .unwrap();
        assert_eq!(opera.browser, "opera");
        assert_eq!(opera.profile, "Opera Stable");
    }

    #[test]
    fn test_unrelated_files_rejected() {
        assert_eq!(classify_profile_path("Users/bob/Documents/History", "History"), None);
        // Too deep: a History file inside some profile subdirectory
        assert_eq!(
            classify_profile_path(
                "Users/bob/AppData/Local/Google/Chrome/User Data/Default/Sessions/History",
                "History"
            ),
            None
        );
    }
}
