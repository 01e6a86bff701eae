pub mod shared {
    pub mod bounding_box;
    pub mod clock;
    pub mod constants;
    pub mod engine_config;
    pub mod frame;
}

pub mod events {
    pub mod event_bus;
    pub mod recognition_event;
}

pub mod tracking {
    pub mod domain {
        pub mod detection_filter;
        pub mod face_detector;
        pub mod track;
    }
    pub mod infrastructure;
    pub mod track_reconciler;
}

pub mod recognition {
    pub mod domain {
        pub mod confirmation_ui;
        pub mod face_overlay;
        pub mod face_recognizer;
        pub mod tracked_face;
    }
    pub mod infrastructure;
    pub mod confirmation_arbiter;
    pub mod decision_engine;
}

pub mod attendance {
    pub mod domain {
        pub mod attendance_backend;
        pub mod attendance_ledger;
        pub mod attendance_record;
        pub mod roster;
    }
    pub mod infrastructure;
    pub mod submission_pipeline;
}

pub mod session {
    pub mod domain {
        pub mod frame_source;
        pub mod session_state;
    }
    pub mod frame_loop;
    pub mod frame_loop_logger;
    pub mod quality_gate;
    pub mod session_controller;
}
