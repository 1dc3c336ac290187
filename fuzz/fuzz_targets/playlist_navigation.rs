#![no_main]

use captune::model::Track;
use captune::playlist::Playlist;
use libfuzzer_sys::fuzz_target;
use std::collections::HashSet;

fuzz_target!(|data: &[u8]| {
    let Some((&first, ops)) = data.split_first() else {
        return;
    };
    let len = usize::from(first % 32);
    let mut playlist = Playlist::seeded(u64::from(first));
    playlist.load_files(
        (0..len).map(|idx| Track::new(format!("track_{idx}.mp3"), format!("track {idx}"))),
    );

    for byte in ops {
        match byte % 5 {
            0 => {
                playlist.move_next();
            }
            1 => {
                playlist.move_previous();
            }
            2 => playlist.toggle_shuffle(),
            3 => {
                playlist.move_to_index(usize::from(byte / 5) % (len + 1));
            }
            _ => playlist.reset(),
        }

        if let Some(current) = playlist.current_index() {
            assert!(current < len);
            assert!(playlist.was_played(current));
        }
        let upcoming: Vec<usize> = playlist.upcoming().collect();
        let unique: HashSet<usize> = upcoming.iter().copied().collect();
        assert_eq!(unique.len(), upcoming.len());
        assert!(upcoming.iter().all(|idx| *idx < len));
        assert!(playlist.history().iter().all(|idx| *idx < len));
    }
});
